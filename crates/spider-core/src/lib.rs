//! spider-core
//!
//! Core of the Spider task scheduler: many stateless scheduler processes share
//! one metadata store and coordinate only through its conditional updates.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state machine, job spec, lease, decision, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, TaskExecutor, ResultsCache, AdminExecutor）
//! - **app**: アプリケーションロジック（resolver, lease manager, orchestrator, coordinator, reaper, gc）
//! - **impls**: 実装（InMemoryTaskStore, FunctionRegistry など）
//! - **bootstrap**: DB プロビジョニングと results cache のインデックス
//! - **config**: スケジューラ設定（TOML）

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::config::SchedulerConfig;
pub use crate::domain::{Result, SpiderError};
