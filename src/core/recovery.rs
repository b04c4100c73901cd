//! 错误恢复引擎
//!
//! 根据 CoreError 返回 RecoveryAction：用户永远看到平实语言的回复，而不是原始错误。

use crate::core::{CoreError, RecoveryAction};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &CoreError) -> RecoveryAction {
        match err {
            CoreError::Schema { skill, source } => RecoveryAction::Clarify(format!(
                "I need a bit more information to run {}: {}. Could you provide it?",
                skill,
                source.user_hint()
            )),
            CoreError::UnknownSkill(_) => RecoveryAction::Fallback(
                "I'm not able to do that yet. Could you rephrase what you need?".to_string(),
            ),
            CoreError::CircuitOpen(_) => RecoveryAction::Fallback(
                "That service is temporarily unavailable. Please try again in a moment.".to_string(),
            ),
            CoreError::Timeout { .. } => RecoveryAction::Fallback(
                "That took too long to complete. Please try again shortly.".to_string(),
            ),
            CoreError::SkillFailed { skill, .. } => RecoveryAction::Fallback(format!(
                "Something went wrong while running {}. No changes were confirmed; you can retry.",
                skill
            )),
            CoreError::Llm(_) => RecoveryAction::Fallback(
                "I'm having trouble thinking this through right now. Could you try again?".to_string(),
            ),
            CoreError::Memory(_) => RecoveryAction::Fallback(
                "I couldn't access the conversation history, but I can still help.".to_string(),
            ),
            CoreError::Workflow(e) => RecoveryAction::Fallback(format!(
                "The requested procedure could not be started: {}.",
                e
            )),
            CoreError::Cancelled => RecoveryAction::Fallback(
                "The request took too long and was stopped. Partial results were not applied.".to_string(),
            ),
            CoreError::Config(msg) => RecoveryAction::Abort(format!("Configuration error: {}", msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SchemaError;

    #[test]
    fn test_schema_error_asks_for_clarification() {
        let engine = RecoveryEngine::new();
        let err = CoreError::Schema {
            skill: "feasibility_analysis".into(),
            source: SchemaError::MissingField("location".into()),
        };
        match engine.handle(&err) {
            RecoveryAction::Clarify(msg) => assert!(msg.contains("location")),
            other => panic!("expected Clarify, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_failures_fall_back() {
        let engine = RecoveryEngine::new();
        for err in [
            CoreError::CircuitOpen("llm".into()),
            CoreError::Timeout {
                dependency: "skills".into(),
                after_ms: 10,
            },
            CoreError::SkillFailed {
                skill: "x".into(),
                message: "boom".into(),
            },
        ] {
            assert!(err.is_dependency_failure());
            assert!(matches!(engine.handle(&err), RecoveryAction::Fallback(_)));
        }
    }

    #[test]
    fn test_config_error_aborts() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&CoreError::Config("bad".into()));
        assert!(matches!(action, RecoveryAction::Abort(_)));
    }
}
