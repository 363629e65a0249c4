//! Bootstrap - 初期化用のヘルパー
//!
//! スケジューラ用データベースのプロビジョニング（名前の検証・DDL）と、
//! results cache のインデックス作成。

pub mod config;
pub mod identifier;
pub mod provision;
pub mod results_cache;
pub mod schema;

pub use self::config::{BootstrapConfig, DatabaseConfig, SpiderDbConfig, load_bootstrap_config};
pub use self::identifier::{validate_identifier, validate_secret};
pub use self::provision::ProvisionPlan;
pub use self::results_cache::{ensure_indexes, stream_indexes};
