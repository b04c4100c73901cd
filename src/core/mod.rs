//! 核心编排层：错误与恢复、依赖装配、单轮请求/响应

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;

pub use builder::{spawn_janitor, OrchestratorBuilder};
pub use error::{CoreError, RecoveryAction};
pub use orchestrator::{confirmation_reply, ExecutedCall, Orchestrator, TurnRequest, TurnResponse};
pub use recovery::RecoveryEngine;
