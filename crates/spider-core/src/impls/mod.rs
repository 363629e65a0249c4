//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 単一プロセス用の正本
//! - **FunctionRegistry**: プロセス内で関数を実行する TaskExecutor
//! - **InMemoryResultsCache**: テスト用の results cache
//! - **RecordingAdmin**: 実行せずに DDL を記録する AdminExecutor（dry-run）
//!
//! MariaDB / MongoDB のバックエンドは `spider-cli` 側にあります。

pub mod function_registry;
pub mod inmem_results_cache;
pub mod inmem_store;
pub mod recording_admin;

pub use self::function_registry::{FunctionRegistry, TaskFunction};
pub use self::inmem_results_cache::InMemoryResultsCache;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::recording_admin::{RecordedStatement, RecordingAdmin};
