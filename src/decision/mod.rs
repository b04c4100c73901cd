//! 决策层
//!
//! - intent：确定性规则预解析隐式指代（命中则不调用模型）
//! - engine：组装上下文、调用模型、校验回复，产出唯一的 Decision
//! - prompt：system prompt 与回复 JSON Schema、模型输出解析
//! - fallback：模型不可用时的关键词回应

pub mod engine;
pub mod fallback;
pub mod intent;
pub mod prompt;
pub mod types;

pub use engine::{DecisionEngine, DecisionInput, DecisionSettings};
pub use fallback::keyword_response;
pub use intent::{IntentResolver, IntentRule, ResolvedIntent};
pub use prompt::{parse_model_output, reply_schema, ModelOutput, ModelReply};
pub use types::{Action, ActionKind, Decision, DecisionSource, FunctionCall, WorkflowPlan};
