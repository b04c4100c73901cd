//! 决策类型：每轮产生一个 Decision，动作种类决定携带的内容（回复文本 / 技能调用列表 / 工作流）

use serde::Serialize;
use serde_json::{Map, Value};

/// 动作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Conversation,
    FunctionCall,
    Workflow,
    Clarification,
    Escalation,
}

/// 单个技能调用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub skill_id: String,
    pub arguments: Map<String, Value>,
    pub confidence: f32,
    pub reasoning: String,
}

/// 工作流计划：模板名 + 初始参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowPlan {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// 动作（每种动作只携带自己的内容）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Conversation { response: String },
    FunctionCall { calls: Vec<FunctionCall> },
    Workflow { plan: WorkflowPlan },
    Clarification { question: String },
    Escalation { message: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Conversation { .. } => ActionKind::Conversation,
            Action::FunctionCall { .. } => ActionKind::FunctionCall,
            Action::Workflow { .. } => ActionKind::Workflow,
            Action::Clarification { .. } => ActionKind::Clarification,
            Action::Escalation { .. } => ActionKind::Escalation,
        }
    }
}

/// 决策来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// 意图预解析命中，未调用模型
    ResolvedIntent,
    Model,
    Cache,
    /// 本地关键词回退或通用说明
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: Action,
    pub confidence: f32,
    pub requires_confirmation: bool,
    pub reasoning: String,
    pub source: DecisionSource,
}

impl Decision {
    pub fn conversation(response: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            action: Action::Conversation {
                response: response.into(),
            },
            confidence: 0.5,
            requires_confirmation: false,
            reasoning: String::new(),
            source,
        }
    }

    pub fn clarification(question: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            action: Action::Clarification {
                question: question.into(),
            },
            confidence: 0.5,
            requires_confirmation: false,
            reasoning: String::new(),
            source,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// 直接面向用户的文本（对话、澄清、升级）
    pub fn text(&self) -> Option<&str> {
        match &self.action {
            Action::Conversation { response } => Some(response),
            Action::Clarification { question } => Some(question),
            Action::Escalation { message } => Some(message),
            _ => None,
        }
    }

    pub fn calls(&self) -> &[FunctionCall] {
        match &self.action {
            Action::FunctionCall { calls } => calls,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let d = Decision::conversation("hi", DecisionSource::Model).with_confidence(1.7);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["action"], "conversation");
        assert_eq!(v["response"], "hi");
        assert_eq!(v["confidence"], 1.0);
        assert_eq!(d.kind(), ActionKind::Conversation);
        assert!(d.calls().is_empty());
    }
}
