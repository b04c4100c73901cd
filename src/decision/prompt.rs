//! 提示组装与模型输出解析
//!
//! 模型回复只接受两种形态：纯文本（视为对话），或一个 JSON 对象（```json 代码块或裸 `{..}`），
//! 其 JSON Schema 由 schemars 生成并写入 system prompt。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::llm::Message;
use crate::memory::ScoredMemory;
use crate::skills::SkillDescriptor;

use super::intent::ResolvedIntent;

/// 模型可选的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAction {
    Conversation,
    FunctionCall,
    Workflow,
    Clarification,
    Escalation,
}

/// 模型给出的单个技能调用
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModelCall {
    /// 技能 ID，必须来自可用技能列表
    #[serde(alias = "id", alias = "skill_id")]
    pub skill: String,
    #[serde(default, alias = "args")]
    pub arguments: Value,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// 结构化回复
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModelReply {
    pub action: ReplyAction,
    /// conversation / clarification / escalation 的文本
    #[serde(default)]
    pub response: Option<String>,
    /// function_call 的调用列表
    #[serde(default)]
    pub calls: Vec<ModelCall>,
    /// workflow 的模板名
    #[serde(default)]
    pub workflow: Option<String>,
    /// workflow 的初始参数
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// 解析结果
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Text(String),
    Structured(ModelReply),
    /// 含 JSON 但不符合回复格式
    Malformed(String),
}

/// 从模型输出中提取 JSON 并解析为 ModelReply
///
/// - ```json 代码块，或整段输出以 `{` 开头：按结构化回复解析，失败为 Malformed
/// - 文本中夹带的 `{..}`：能解析为 ModelReply 才算结构化，否则整段仍是纯文本
pub fn parse_model_output(output: &str) -> ModelOutput {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let json_str = rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
        return parse_reply(json_str);
    }

    let span = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return ModelOutput::Text(trimmed.to_string()),
    };
    if trimmed.starts_with('{') {
        return parse_reply(span);
    }
    match serde_json::from_str::<ModelReply>(span) {
        Ok(reply) => ModelOutput::Structured(reply),
        Err(_) => ModelOutput::Text(trimmed.to_string()),
    }
}

fn parse_reply(json_str: &str) -> ModelOutput {
    match serde_json::from_str::<ModelReply>(json_str) {
        Ok(reply) => ModelOutput::Structured(reply),
        Err(e) => ModelOutput::Malformed(format!("{}: {}", e, json_str)),
    }
}

/// 回复格式的 JSON Schema（格式化字符串）
pub fn reply_schema() -> String {
    let schema = schema_for!(ModelReply);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

/// 组装提示所需的全部输入
pub struct PromptInput<'a> {
    pub utterance: &'a str,
    pub summary: &'a str,
    pub memories: &'a [ScoredMemory],
    pub skills: &'a [SkillDescriptor],
    pub workflows: &'a [(String, String)],
    pub resolved: Option<&'a ResolvedIntent>,
    pub max_calls: usize,
}

const INSTRUCTIONS: &str = "You are the decision core of a real-estate assistant. \
For each user message choose exactly one action:\n\
- conversation: answer in plain language (field `response`)\n\
- function_call: call one or more of the available skills (field `calls`)\n\
- workflow: run one of the named workflows (fields `workflow`, `arguments`)\n\
- clarification: ask the user for the missing information (field `response`)\n\
- escalation: hand the request over to a human operator (field `response`)\n\
Never mix text and skill calls in one reply. Only use skill ids from the list below and \
arguments that match their schema. Prefer the resolved intent if one is present, otherwise \
choose the single best action. Reply with plain text for a simple conversation, or with one \
JSON object matching the reply schema.";

pub fn build_messages(input: &PromptInput<'_>) -> Vec<Message> {
    let mut system = String::from(INSTRUCTIONS);
    system.push_str(&format!(
        "\nAt most {} skill calls per reply.\n\n## Reply schema\n{}\n",
        input.max_calls,
        reply_schema()
    ));

    system.push_str("\n## Available skills\n");
    if input.skills.is_empty() {
        system.push_str("(none)\n");
    }
    for skill in input.skills {
        let flag = if skill.sensitive { " [requires user confirmation]" } else { "" };
        system.push_str(&format!(
            "- {}{}: {}\n  schema: {}\n",
            skill.id, flag, skill.description, skill.schema
        ));
    }

    if !input.workflows.is_empty() {
        system.push_str("\n## Workflows\n");
        for (name, description) in input.workflows {
            system.push_str(&format!("- {}: {}\n", name, description));
        }
    }

    system.push_str("\n## Session context\n");
    system.push_str(input.summary);
    system.push('\n');

    if !input.memories.is_empty() {
        system.push_str("\n## Relevant memory\n");
        for m in input.memories {
            system.push_str(&format!("- ({:.2}) {}\n", m.relevance, m.snippet));
        }
    }

    if let Some(intent) = input.resolved {
        let args = Value::Object(intent.arguments.clone());
        system.push_str(&format!(
            "\n## Resolved intent\nskill: {}\narguments: {}\nreason: {}\n",
            intent.forced_skill_id, args, intent.reasoning
        ));
    }

    vec![Message::system(system), Message::user(input.utterance)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_conversation() {
        match parse_model_output("  Ciao! Come posso aiutarti?  ") {
            ModelOutput::Text(t) => assert_eq!(t, "Ciao! Come posso aiutarti?"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_block_with_aliases() {
        let raw = "Sure.\n```json\n{\"action\":\"function_call\",\"calls\":[{\"id\":\"echo\",\"args\":{\"text\":\"hi\"},\"confidence\":0.8}]}\n```";
        let ModelOutput::Structured(reply) = parse_model_output(raw) else {
            panic!("expected structured reply");
        };
        assert_eq!(reply.action, ReplyAction::FunctionCall);
        assert_eq!(reply.calls[0].skill, "echo");
        assert_eq!(reply.calls[0].arguments, json!({"text": "hi"}));
    }

    #[test]
    fn test_bare_object_and_malformed() {
        let ModelOutput::Structured(reply) =
            parse_model_output(r#"{"action":"workflow","workflow":"full_analysis","arguments":{"location":"Turin"}}"#)
        else {
            panic!("expected structured reply");
        };
        assert_eq!(reply.workflow.as_deref(), Some("full_analysis"));
        assert_eq!(reply.arguments["location"], json!("Turin"));

        assert!(matches!(
            parse_model_output(r#"{"action":"dance"}"#),
            ModelOutput::Malformed(_)
        ));
    }

    #[test]
    fn test_braces_inside_prose_stay_text() {
        let raw = "Profit is computed as {revenue - cost}; for Turin it is about 1.2M.";
        match parse_model_output(raw) {
            ModelOutput::Text(t) => assert_eq!(t, raw),
            other => panic!("unexpected {:?}", other),
        }

        let ModelOutput::Structured(reply) =
            parse_model_output(r#"Here you go: {"action":"conversation","response":"ok"}"#)
        else {
            panic!("expected structured reply");
        };
        assert_eq!(reply.response.as_deref(), Some("ok"));
    }

    #[test]
    fn test_prompt_lists_skills_and_context() {
        let skills = vec![SkillDescriptor {
            id: "project_save".into(),
            description: "Save a project".into(),
            schema: json!({"type": "object"}),
            sensitive: true,
        }];
        let messages = build_messages(&PromptInput {
            utterance: "save it",
            summary: "Last operation: feasibility",
            memories: &[],
            skills: &skills,
            workflows: &[("full_analysis".into(), "all steps".into())],
            resolved: None,
            max_calls: 3,
        });
        assert_eq!(messages.len(), 2);
        let system = &messages[0].content;
        assert!(system.contains("project_save [requires user confirmation]"));
        assert!(system.contains("full_analysis"));
        assert!(system.contains("Last operation: feasibility"));
        assert!(system.contains("\"action\""));
        assert_eq!(messages[1].content, "save it");
    }
}
