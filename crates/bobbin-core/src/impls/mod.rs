//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 単一プロセス用の TaskStore
//!
//! 本番用の永続ストア実装は別クレートに置く想定です。

pub mod memory_store;

pub use self::memory_store::InMemoryTaskStore;
