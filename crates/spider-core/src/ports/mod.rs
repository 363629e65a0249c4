//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システム（MariaDB, MongoDB,
//! worker プロセス）へのインターフェースを定義し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - MariaDB (TaskStore) が source of truth（正本）
//! - Scheduler は状態を持たず、TaskStore の条件付き更新だけで協調する

pub mod admin;
pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod results_cache;
pub mod task_store;

pub use self::admin::AdminExecutor;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{Assignment, TaskExecutor};
pub use self::id_generator::{IdGenerator, UlidGenerator, next_id};
pub use self::results_cache::{IndexSpec, ResultsCache};
pub use self::task_store::{AcquireRequest, MAX_KV_KEY_LEN, ReadyQuery, TaskStore, validate_kv_key};
