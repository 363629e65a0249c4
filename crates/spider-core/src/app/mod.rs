//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューラのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DependencyResolver**: pending → ready の昇格と cascade
//! - **LeaseManager**: lease の acquire / renew / release / reclaim
//! - **JobOrchestrator**: ジョブの投入・キャンセル・状態集約・削除
//! - **SchedulerCoordinator**: poll → acquire → dispatch → release のループ
//! - **ReaperLoop**: Lease 期限切れの回収
//! - **GcLoop**: 参照されなくなった Data の削除

pub mod backoff;
pub mod coordinator;
pub mod gc_loop;
pub mod lease_manager;
pub mod orchestrator;
pub mod reaper_loop;
pub mod resolver;

pub use self::backoff::RetryPolicy;
pub use self::coordinator::{SchedulerCoordinator, TickReport, TickState};
pub use self::gc_loop::GcLoop;
pub use self::lease_manager::LeaseManager;
pub use self::orchestrator::JobOrchestrator;
pub use self::reaper_loop::ReaperLoop;
pub use self::resolver::DependencyResolver;
