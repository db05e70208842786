//! デモ用の task 定義と handler

use async_trait::async_trait;
use bobbin_core::{Handler, HandlerError, Task, TaskContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub user_id: u64,
}

impl Task for WelcomeEmail {
    const TYPE: &'static str = "email:welcome";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLaterEmail {
    pub user_id: String,
    pub send_at: DateTime<Utc>,
}

impl Task for SendLaterEmail {
    const TYPE: &'static str = "email:send_later";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloWorld;

impl Task for HelloWorld {
    const TYPE: &'static str = "task:hello_world";
}

pub struct WelcomeEmailHandler;

#[async_trait]
impl Handler<WelcomeEmail> for WelcomeEmailHandler {
    async fn handle(&self, ctx: &TaskContext, task: WelcomeEmail) -> Result<(), HandlerError> {
        info!(
            user_id = task.user_id,
            queue = %ctx.queue,
            attempt = ctx.retry_count + 1,
            "sending welcome email"
        );
        Ok(())
    }
}

pub struct SendLaterEmailHandler;

#[async_trait]
impl Handler<SendLaterEmail> for SendLaterEmailHandler {
    async fn handle(&self, _ctx: &TaskContext, task: SendLaterEmail) -> Result<(), HandlerError> {
        let late_by = Utc::now().signed_duration_since(task.send_at);
        info!(
            user_id = %task.user_id,
            send_at = %task.send_at,
            late_ms = late_by.num_milliseconds(),
            "sending reminder email"
        );
        Ok(())
    }
}

pub struct HelloWorldHandler;

#[async_trait]
impl Handler<HelloWorld> for HelloWorldHandler {
    async fn handle(&self, _ctx: &TaskContext, _task: HelloWorld) -> Result<(), HandlerError> {
        info!("hello world");
        Ok(())
    }
}
