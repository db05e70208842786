//! App - アプリケーション層
//!
//! ports を組み合わせて queue engine を実装します。
//!
//! # 主要コンポーネント
//! - **Client**: Producer。validation と store への durable な書き込み
//! - **Executor**: 一件の実行（handler 解決、timeout、panic 隔離、ack/retry/kill）
//! - **WorkerPool**: 重み付き dequeue ループと並行数の上限
//! - **Reaper**: Lease 期限切れの回収と retention の掃除
//! - **Scheduler**: cron entry の発火
//! - **Engine / EngineBuilder**: ワイヤリングと起動・停止の順序

mod background;
pub mod builder;
pub mod client;
pub mod engine;
pub mod executor;
pub mod reaper;
pub mod scheduler;
pub mod status;
mod store_retry;
pub mod worker_pool;

pub use self::background::LoopHandle;
pub use self::builder::EngineBuilder;
pub use self::client::{Client, TaskDefaults};
pub use self::engine::Engine;
pub use self::executor::{Executor, Outcome};
pub use self::reaper::{ReapReport, Reaper};
pub use self::scheduler::{CronEntry, CronSpec, Scheduler, TaskTemplate};
pub use self::status::{CronEntryStatus, EngineStatus};
pub use self::store_retry::StoreRetry;
pub use self::worker_pool::{PoolConfig, PoolStopReport, WorkerPool};
