//! Backends - 外部システムとの接続
//!
//! - mariadb: AdminExecutor（sqlx / MySQL プロトコル）
//! - mongo: ResultsCache（mongodb ドライバ）

#[cfg(feature = "mariadb")]
pub mod mariadb;

#[cfg(feature = "results-cache")]
pub mod mongo;
