//! bobbin-core
//!
//! Priority task queue and cron scheduler engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task record, state, options, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **impls**: 実装（開発・テスト用の InMemoryTaskStore）
//! - **queue**: retry backoff と重み付き lane 選択
//! - **typed**: 型付き Task API（Task trait, Handler trait, Dispatcher, PayloadCodec）
//! - **app**: Client, WorkerPool, Scheduler, Engine
//! - **config**: EngineConfig（TOML）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{Client, Engine, EngineBuilder, TaskTemplate};
pub use config::EngineConfig;
pub use domain::{EnqueueOptions, HandlerError, TaskId, TaskInfo, TaskState};
pub use typed::{Handler, Task, TaskContext};
