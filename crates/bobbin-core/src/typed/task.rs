//! Task trait - 型付き Task の定義
//!
//! `const TYPE` で task_type と Rust の型を 1:1 に対応付けます。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct WelcomeEmail {
///     user_id: u64,
/// }
///
/// impl Task for WelcomeEmail {
///     const TYPE: &'static str = "email:welcome";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: enqueue 時に payload bytes へ encode するため
/// - `DeserializeOwned`: worker 側で payload bytes から復元するため
/// - `Send + Sync + 'static`: Arc に格納して worker 間で共有するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Task;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct WelcomeEmail {
        pub user_id: u64,
    }

    impl Task for WelcomeEmail {
        const TYPE: &'static str = "email:welcome";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct HelloWorld;

    impl Task for HelloWorld {
        const TYPE: &'static str = "task:hello_world";
    }
}
