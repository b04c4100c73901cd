//! 决策引擎
//!
//! 每轮产出且只产出一个 Decision，从不返回错误：
//! 1. 意图预解析命中且参数通过 schema 校验：直接合成 function_call，不调用模型
//! 2. 查缓存（精确键，其次模糊匹配；只缓存模型给出的对话决策）
//! 3. 检索记忆（失败只记日志），组装提示，经 llm 熔断器调用模型
//! 4. 解析回复：未知技能 → 通用说明；schema 不符 → 澄清；空回复或模型不可用 → 关键词回退
//! 5. 敏感技能（静态策略列表或技能自身声明）一律要求确认

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::memory::{MemoryRetriever, RetrievalScope, ScoredMemory};
use crate::resilience::{cache_key, CircuitBreaker, ResponseCache};
use crate::skills::SkillCatalog;
use crate::workflow::{StepInput, WorkflowRegistry, INPUT_REF};

use super::fallback::keyword_response;
use super::intent::ResolvedIntent;
use super::prompt::{build_messages, parse_model_output, ModelCall, ModelOutput, ModelReply, PromptInput, ReplyAction};
use super::types::{Action, Decision, DecisionSource, FunctionCall, WorkflowPlan};

const GENERIC_EXPLANATION: &str = "I couldn't find a suitable way to handle that request with the tools I have. Could you tell me a bit more about what you need?";
const ESCALATION_DEFAULT: &str = "I'm forwarding your request to a human operator who will get back to you.";

/// 模型未给置信度时的默认值
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.7;
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// 决策引擎参数（启动期由配置生成）
#[derive(Debug, Clone)]
pub struct DecisionSettings {
    pub max_calls: usize,
    pub forced_confidence: f32,
    pub sensitive_skills: HashSet<String>,
    pub memory_limit: usize,
    /// 为 0 时关闭模糊缓存查找
    pub fuzzy_threshold: f64,
}

impl DecisionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_calls: cfg.llm.max_calls_per_turn,
            forced_confidence: cfg.decision.forced_confidence.clamp(0.0, 1.0),
            sensitive_skills: cfg.decision.sensitive_skills.iter().cloned().collect(),
            memory_limit: cfg.memory.search_limit,
            fuzzy_threshold: cfg.cache.fuzzy_threshold,
        }
    }
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 单轮决策输入
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub utterance: String,
    pub user_id: String,
    pub session_id: String,
    pub summary: String,
    pub resolved: Option<ResolvedIntent>,
}

pub struct DecisionEngine {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<SkillCatalog>,
    workflows: Arc<WorkflowRegistry>,
    retriever: Arc<MemoryRetriever>,
    breaker: Arc<CircuitBreaker>,
    cache: Option<Arc<ResponseCache<Decision>>>,
    settings: DecisionSettings,
}

impl DecisionEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<SkillCatalog>,
        workflows: Arc<WorkflowRegistry>,
        retriever: Arc<MemoryRetriever>,
        breaker: Arc<CircuitBreaker>,
        settings: DecisionSettings,
    ) -> Self {
        Self {
            llm,
            catalog,
            workflows,
            retriever,
            breaker,
            cache: None,
            settings,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache<Decision>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 技能是否敏感
    pub fn is_sensitive(&self, skill_id: &str) -> bool {
        self.settings.sensitive_skills.contains(skill_id)
            || self.catalog.get(skill_id).map(|s| s.sensitive()).unwrap_or(false)
    }

    pub async fn decide(&self, input: &DecisionInput) -> Decision {
        if let Some(intent) = &input.resolved {
            if let Some(decision) = self.forced_decision(intent) {
                return decision;
            }
        }

        // 缓存作用域：用户 + 会话
        let scope = format!("{}|{}", input.user_id, input.session_id);
        let fingerprint = format!("{}|{}|{}", self.llm.model_name(), scope, input.summary);
        let key = cache_key(&input.utterance, &fingerprint);
        if let Some(hit) = self.cached(&key, &input.utterance, &scope) {
            return hit;
        }

        let memories = self.recall(input).await;
        let skills = self.catalog.descriptors();
        let workflows = self.workflows.describe();
        let messages = build_messages(&PromptInput {
            utterance: &input.utterance,
            summary: &input.summary,
            memories: &memories,
            skills: &skills,
            workflows: &workflows,
            resolved: input.resolved.as_ref(),
            max_calls: self.settings.max_calls,
        });

        let llm = Arc::clone(&self.llm);
        let raw = match self.breaker.call(|| async move { llm.complete(&messages).await }).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "model call failed, using keyword fallback");
                return fallback(&input.utterance, format!("model unavailable: {}", e));
            }
        };

        let decision = match parse_model_output(&raw) {
            ModelOutput::Text(text) if text.is_empty() => {
                fallback(&input.utterance, "model returned an empty reply".to_string())
            }
            ModelOutput::Text(text) => Decision::conversation(text, DecisionSource::Model)
                .with_confidence(DEFAULT_MODEL_CONFIDENCE),
            ModelOutput::Malformed(err) => {
                tracing::warn!(error = %err, "model reply is not a valid decision, using keyword fallback");
                fallback(&input.utterance, "model reply could not be parsed".to_string())
            }
            ModelOutput::Structured(reply) => self.interpret(reply, &input.utterance),
        };

        if decision.source == DecisionSource::Model {
            if let (Some(cache), Action::Conversation { .. }) = (&self.cache, &decision.action) {
                cache.set_with_text(key, &input.utterance, &scope, decision.clone(), None);
            }
        }

        tracing::info!(
            action = ?decision.kind(),
            source = ?decision.source,
            confidence = decision.confidence,
            requires_confirmation = decision.requires_confirmation,
            "decision made"
        );
        decision
    }

    /// 意图预解析命中：校验参数后直接合成 function_call；校验失败返回 None 交给模型
    fn forced_decision(&self, intent: &ResolvedIntent) -> Option<Decision> {
        let args = Value::Object(intent.arguments.clone());
        let validated = match self.catalog.validate(&intent.forced_skill_id, &args) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(skill = %intent.forced_skill_id, error = %e, "resolved intent rejected by schema, deferring to model");
                return None;
            }
        };
        let confidence = self.settings.forced_confidence;
        Some(Decision {
            action: Action::FunctionCall {
                calls: vec![FunctionCall {
                    skill_id: intent.forced_skill_id.clone(),
                    arguments: validated.into_map(),
                    confidence,
                    reasoning: intent.reasoning.clone(),
                }],
            },
            confidence,
            requires_confirmation: self.is_sensitive(&intent.forced_skill_id),
            reasoning: intent.reasoning.clone(),
            source: DecisionSource::ResolvedIntent,
        })
    }

    fn cached(&self, key: &str, utterance: &str, scope: &str) -> Option<Decision> {
        let cache = self.cache.as_ref()?;
        let hit = cache.get(key).or_else(|| {
            if self.settings.fuzzy_threshold > 0.0 {
                cache.find_similar(utterance, scope, self.settings.fuzzy_threshold)
            } else {
                None
            }
        })?;
        tracing::debug!("decision served from cache");
        Some(Decision {
            source: DecisionSource::Cache,
            ..hit
        })
    }

    async fn recall(&self, input: &DecisionInput) -> Vec<ScoredMemory> {
        let scope = RetrievalScope {
            user_id: input.user_id.clone(),
            session_id: Some(input.session_id.clone()),
        };
        match self
            .retriever
            .search(&input.utterance, &scope, self.settings.memory_limit)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(error = %e, "memory search failed, deciding without memory");
                Vec::new()
            }
        }
    }

    fn interpret(&self, reply: ModelReply, utterance: &str) -> Decision {
        let confidence = reply.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE).clamp(0.0, 1.0);
        let reasoning = reply.reasoning.clone().unwrap_or_default();
        let text = reply
            .response
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let decision = match reply.action {
            ReplyAction::Conversation => match text {
                Some(t) => Decision::conversation(t, DecisionSource::Model),
                None => return fallback(utterance, "model returned an empty conversation".into()),
            },
            ReplyAction::Clarification => match text {
                Some(t) => Decision::clarification(t, DecisionSource::Model),
                None => return fallback(utterance, "model returned an empty clarification".into()),
            },
            ReplyAction::Escalation => Decision {
                action: Action::Escalation {
                    message: text.unwrap_or_else(|| ESCALATION_DEFAULT.to_string()),
                },
                confidence,
                requires_confirmation: false,
                reasoning: String::new(),
                source: DecisionSource::Model,
            },
            ReplyAction::FunctionCall => {
                if reply.calls.is_empty() {
                    return match text {
                        Some(t) => Decision::conversation(t, DecisionSource::Model)
                            .with_confidence(confidence)
                            .with_reasoning(reasoning),
                        None => fallback(utterance, "model returned no calls and no text".into()),
                    };
                }
                return self.calls_decision(reply.calls, confidence, reasoning);
            }
            ReplyAction::Workflow => {
                return self.workflow_decision(reply.workflow, reply.arguments, confidence, reasoning);
            }
        };
        decision.with_confidence(confidence).with_reasoning(reasoning)
    }

    fn calls_decision(&self, mut calls: Vec<ModelCall>, confidence: f32, reasoning: String) -> Decision {
        if let Some(unknown) = calls.iter().find(|c| !self.catalog.contains(&c.skill)) {
            tracing::warn!(skill = %unknown.skill, "model referenced an unknown skill, reply dropped");
            return generic_explanation(format!("unknown skill '{}'", unknown.skill));
        }

        if calls.len() > self.settings.max_calls {
            tracing::warn!(
                requested = calls.len(),
                max = self.settings.max_calls,
                "too many skill calls in one reply, extra calls dropped"
            );
            calls.truncate(self.settings.max_calls);
        }

        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            let validated = match self.catalog.validate(&call.skill, &call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(skill = %call.skill, error = %e, "model call arguments rejected by schema");
                    return Decision::clarification(
                        format!("I need a bit more information before I can proceed: {}. Could you provide it?", e.user_hint()),
                        DecisionSource::Model,
                    )
                        .with_confidence(confidence)
                        .with_reasoning(format!("invalid arguments for '{}': {}", call.skill, e));
                }
            };
            out.push(FunctionCall {
                confidence: call.confidence.unwrap_or(confidence).clamp(0.0, 1.0),
                reasoning: call.reasoning.unwrap_or_else(|| reasoning.clone()),
                arguments: validated.into_map(),
                skill_id: call.skill,
            });
        }

        let requires_confirmation = out.iter().any(|c| self.is_sensitive(&c.skill_id));
        Decision {
            action: Action::FunctionCall { calls: out },
            confidence,
            requires_confirmation,
            reasoning,
            source: DecisionSource::Model,
        }
    }

    fn workflow_decision(
        &self,
        name: Option<String>,
        arguments: Map<String, Value>,
        confidence: f32,
        reasoning: String,
    ) -> Decision {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            tracing::warn!("workflow action without a workflow name");
            return generic_explanation("workflow action without a name".into());
        };
        let workflow = match self.workflows.get(&name) {
            Ok(wf) => wf,
            Err(e) => {
                tracing::warn!(workflow = %name, "model referenced an unknown workflow");
                return generic_explanation(e.to_string());
            }
        };
        if let Some(missing) = workflow.skill_ids().into_iter().find(|s| !self.catalog.contains(s)) {
            tracing::warn!(workflow = %name, skill = %missing, "workflow needs a skill that is not registered");
            return generic_explanation(format!("workflow '{}' needs unknown skill '{}'", name, missing));
        }

        // 无守卫步骤引用的 $input 字段必须由模型给出
        let mut missing: Vec<&str> = Vec::new();
        for step in workflow.steps.iter().filter(|s| s.guard.is_none()) {
            for (_, input) in &step.inputs {
                if let StepInput::Ref { step: target, path } = input {
                    if target != INPUT_REF {
                        continue;
                    }
                    if let Some(field) = path.first() {
                        if !arguments.contains_key(field) && !missing.contains(&field.as_str()) {
                            missing.push(field);
                        }
                    }
                }
            }
        }
        if !missing.is_empty() {
            return Decision::clarification(
                format!(
                    "To run this analysis I need some more information: {}.",
                    missing.join(", ")
                ),
                DecisionSource::Model,
            )
            .with_confidence(confidence)
            .with_reasoning(format!("workflow '{}' is missing inputs", name));
        }

        let requires_confirmation = workflow.skill_ids().iter().any(|s| self.is_sensitive(s));
        Decision {
            action: Action::Workflow {
                plan: WorkflowPlan { name, arguments },
            },
            confidence,
            requires_confirmation,
            reasoning,
            source: DecisionSource::Model,
        }
    }
}

fn fallback(utterance: &str, reasoning: String) -> Decision {
    Decision::conversation(keyword_response(utterance), DecisionSource::Fallback)
        .with_confidence(FALLBACK_CONFIDENCE)
        .with_reasoning(reasoning)
}

fn generic_explanation(reasoning: String) -> Decision {
    Decision::conversation(GENERIC_EXPLANATION, DecisionSource::Fallback)
        .with_confidence(FALLBACK_CONFIDENCE)
        .with_reasoning(reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::intent::IntentRule;
    use crate::llm::{ScriptedLlmClient, ScriptedReply};
    use crate::memory::{InMemoryMemoryStore, NewMemory};
    use crate::resilience::BreakerConfig;
    use crate::skills::{
        ExecutionContext, FieldKind, FieldSpec, Skill, SkillError, SkillSchema, ValidatedArgs,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct LocationSkill(&'static str);

    #[async_trait]
    impl Skill for LocationSkill {
        fn id(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "analysis for a location"
        }
        fn input_schema(&self) -> SkillSchema {
            SkillSchema::new()
                .field(FieldSpec::required("location", FieldKind::String, "city"))
                .allow_extra()
        }
        async fn execute(&self, a: ValidatedArgs, _c: &ExecutionContext) -> Result<Value, SkillError> {
            Ok(a.to_value())
        }
    }

    struct SaveSkill;

    #[async_trait]
    impl Skill for SaveSkill {
        fn id(&self) -> &str {
            "project_save"
        }
        fn description(&self) -> &str {
            "save"
        }
        fn input_schema(&self) -> SkillSchema {
            SkillSchema::new()
                .field(FieldSpec::required("project_name", FieldKind::String, "name"))
                .allow_extra()
        }
        async fn execute(&self, a: ValidatedArgs, _c: &ExecutionContext) -> Result<Value, SkillError> {
            Ok(a.to_value())
        }
    }

    struct Harness {
        llm: Arc<ScriptedLlmClient>,
        engine: DecisionEngine,
        retriever: Arc<MemoryRetriever>,
    }

    fn harness(llm: ScriptedLlmClient, settings: DecisionSettings) -> Harness {
        let llm = Arc::new(llm);
        let mut catalog = SkillCatalog::new();
        catalog.register(LocationSkill("feasibility_analysis"));
        catalog.register(LocationSkill("business_plan"));
        catalog.register(LocationSkill("email_send"));
        catalog.register(SaveSkill);
        let retriever = Arc::new(MemoryRetriever::new(
            Arc::new(InMemoryMemoryStore::default()),
            Arc::new(CircuitBreaker::new("memory", BreakerConfig::storage())),
            Duration::ZERO,
        ));
        let engine = DecisionEngine::new(
            llm.clone(),
            Arc::new(catalog),
            Arc::new(WorkflowRegistry::builtin().unwrap()),
            retriever.clone(),
            Arc::new(CircuitBreaker::new("llm", BreakerConfig::llm())),
            settings,
        );
        Harness { llm, engine, retriever }
    }

    fn input(utterance: &str) -> DecisionInput {
        DecisionInput {
            utterance: utterance.into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            summary: "No previous operations in this session.".into(),
            resolved: None,
        }
    }

    #[tokio::test]
    async fn test_forced_intent_skips_model() {
        let h = harness(ScriptedLlmClient::new(), DecisionSettings::default());
        let mut args = Map::new();
        args.insert("project_name".into(), json!("Turin"));
        let mut i = input("save these results");
        i.resolved = Some(ResolvedIntent {
            forced_skill_id: "project_save".into(),
            arguments: args,
            reasoning: "save refers to last op".into(),
            rule: IntentRule::SaveReference,
        });

        let d = h.engine.decide(&i).await;
        assert_eq!(d.source, DecisionSource::ResolvedIntent);
        assert_eq!(d.calls()[0].skill_id, "project_save");
        assert_eq!(d.calls()[0].arguments["project_name"], json!("Turin"));
        assert!((d.confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_forced_intent_defers_to_model() {
        let h = harness(ScriptedLlmClient::with_replies(["Sure, which project?"]), DecisionSettings::default());
        let mut i = input("save it");
        i.resolved = Some(ResolvedIntent {
            forced_skill_id: "project_save".into(),
            arguments: Map::new(),
            reasoning: "r".into(),
            rule: IntentRule::SaveReference,
        });
        let d = h.engine.decide(&i).await;
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(d.source, DecisionSource::Model);
        let prompt = &h.llm.last_messages().unwrap()[0].content;
        assert!(prompt.contains("Resolved intent"));
    }

    #[tokio::test]
    async fn test_unknown_skill_falls_back_to_explanation() {
        let h = harness(
            ScriptedLlmClient::with_replies([r#"{"action":"function_call","calls":[{"skill":"teleport","arguments":{}}]}"#]),
            DecisionSettings::default(),
        );
        let d = h.engine.decide(&input("teleport me")).await;
        assert_eq!(d.text(), Some(GENERIC_EXPLANATION));
        assert_eq!(d.source, DecisionSource::Fallback);
    }

    #[tokio::test]
    async fn test_empty_reply_and_model_failure_use_keywords() {
        let llm = ScriptedLlmClient::with_replies([""]);
        llm.push(ScriptedReply::Fail("down".into()));
        let h = harness(llm, DecisionSettings::default());

        let d = h.engine.decide(&input("ciao")).await;
        assert_eq!(d.source, DecisionSource::Fallback);
        assert_eq!(d.text(), Some(keyword_response("ciao")));

        let d = h.engine.decide(&input("help")).await;
        assert_eq!(d.source, DecisionSource::Fallback);
        assert_eq!(d.text(), Some(keyword_response("help")));
    }

    #[tokio::test]
    async fn test_schema_violation_asks_for_field() {
        let h = harness(
            ScriptedLlmClient::with_replies([r#"{"action":"function_call","calls":[{"skill":"feasibility_analysis","arguments":{}}]}"#]),
            DecisionSettings::default(),
        );
        let d = h.engine.decide(&input("run feasibility")).await;
        assert!(matches!(d.action, Action::Clarification { .. }));
        assert!(d.text().unwrap().contains("location"));
    }

    #[tokio::test]
    async fn test_calls_truncated_and_sensitive_gated() {
        let settings = DecisionSettings {
            max_calls: 2,
            ..Default::default()
        };
        let h = harness(
            ScriptedLlmClient::with_replies([r#"{"action":"function_call","confidence":0.4,"calls":[
                {"skill":"feasibility_analysis","arguments":{"location":"Milan"}},
                {"skill":"email_send","arguments":{"location":"Rome"}},
                {"skill":"business_plan","arguments":{"location":"Rome"}}]}"#]),
            settings,
        );
        let d = h.engine.decide(&input("analyse and email")).await;
        assert_eq!(d.calls().len(), 2);
        assert!(d.requires_confirmation);
        assert!((d.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_workflow_requires_inputs_and_known_template() {
        let h = harness(
            ScriptedLlmClient::with_replies([
                r#"{"action":"workflow","workflow":"full_analysis","arguments":{}}"#,
                r#"{"action":"workflow","workflow":"full_analysis","arguments":{"location":"Turin"}}"#,
                r#"{"action":"workflow","workflow":"mystery"}"#,
            ]),
            DecisionSettings::default(),
        );
        let d = h.engine.decide(&input("full analysis")).await;
        assert!(matches!(d.action, Action::Clarification { .. }));
        assert!(d.text().unwrap().contains("location"));

        let d = h.engine.decide(&input("full analysis for Turin")).await;
        let Action::Workflow { plan } = &d.action else {
            panic!("expected workflow, got {:?}", d.action);
        };
        assert_eq!(plan.name, "full_analysis");
        assert!(!d.requires_confirmation);

        let d = h.engine.decide(&input("mystery")).await;
        assert_eq!(d.text(), Some(GENERIC_EXPLANATION));
    }

    #[tokio::test]
    async fn test_conversation_cached_and_fuzzy_hit() {
        let h = harness(ScriptedLlmClient::with_replies(["Hello there, how can I help?"]), DecisionSettings::default());
        let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
        let engine = DecisionEngine { cache: Some(cache), ..h.engine };

        let first = engine.decide(&input("Hello, who are you?")).await;
        assert_eq!(first.source, DecisionSource::Model);
        let second = engine.decide(&input("hello, who are you")).await;
        assert_eq!(second.source, DecisionSource::Cache);
        let third = engine.decide(&input("hello who are you")).await;
        assert_eq!(third.source, DecisionSource::Cache);
        assert_eq!(third.text(), first.text());
        assert_eq!(h.llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_reply_not_shared_across_users_or_sessions() {
        let h = harness(
            ScriptedLlmClient::with_replies([
                "Last time you asked about the Verona feasibility for Villa Rossi.",
                "This is our first conversation.",
                "Nothing yet in this session.",
            ]),
            DecisionSettings::default(),
        );
        let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
        let engine = DecisionEngine { cache: Some(cache), ..h.engine };
        h.retriever
            .save(NewMemory::turn("u1", "s1", "Verona feasibility for Villa Rossi"))
            .await
            .unwrap();

        let own = engine.decide(&input("what did we discuss last time?")).await;
        assert_eq!(own.source, DecisionSource::Model);

        let mut other_user = input("what did we discuss last time?");
        other_user.user_id = "u2".into();
        other_user.session_id = "s9".into();
        let d = engine.decide(&other_user).await;
        assert_eq!(d.source, DecisionSource::Model);
        assert_ne!(d.text(), own.text());

        let mut other_session = input("what did we discuss last time");
        other_session.session_id = "s2".into();
        let d = engine.decide(&other_session).await;
        assert_eq!(d.source, DecisionSource::Model);
        assert_eq!(h.llm.calls(), 3);

        let again = engine.decide(&input("what did we discuss last time?")).await;
        assert_eq!(again.source, DecisionSource::Cache);
        assert_eq!(again.text(), own.text());
    }

    #[tokio::test]
    async fn test_text_reply_with_braces_is_kept() {
        let h = harness(
            ScriptedLlmClient::with_replies(["Profit is computed as {revenue - cost}; for Turin it is about 1.2M."]),
            DecisionSettings::default(),
        );
        let d = h.engine.decide(&input("how is profit computed?")).await;
        assert_eq!(d.source, DecisionSource::Model);
        assert_eq!(
            d.text(),
            Some("Profit is computed as {revenue - cost}; for Turin it is about 1.2M.")
        );
    }

    #[tokio::test]
    async fn test_memory_snippets_reach_prompt() {
        let h = harness(ScriptedLlmClient::with_replies(["ok then, noted"]), DecisionSettings::default());
        h.retriever
            .save(NewMemory::turn("u1", "s1", "user asked about Verona feasibility"))
            .await
            .unwrap();
        h.engine.decide(&input("what did we discuss?")).await;
        let prompt = &h.llm.last_messages().unwrap()[0].content;
        assert!(prompt.contains("Verona feasibility"));
    }
}
