//! 意图预解析
//!
//! 一组有序的确定性规则，在调用模型之前解析明确的隐式指代（"save this"、"go back"、两个地名的比较、
//! 缺参数的动作动词）。只有第一条触发的规则生效；触发但缺少所需上下文时放弃，交给决策引擎。
//! 规则不会强制调用未注册的技能。

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::context::{ContextTracker, EntityCategory, EntityExtractor, OperationKind, SessionContext};
use crate::skills::SkillCatalog;

pub const PROJECT_SAVE: &str = "project_save";
pub const LOCATION_COMPARE: &str = "location_compare";
pub const FEASIBILITY_ANALYSIS: &str = "feasibility_analysis";
pub const BUSINESS_PLAN: &str = "business_plan";
pub const SENSITIVITY_ANALYSIS: &str = "sensitivity_analysis";

/// 触发的规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentRule {
    SaveReference,
    GoBack,
    CompareLocations,
    ParameterlessAction,
}

/// 预解析结果：强制调用的技能与补全后的参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedIntent {
    pub forced_skill_id: String,
    pub arguments: Map<String, Value>,
    pub reasoning: String,
    pub rule: IntentRule,
}

pub struct IntentResolver {
    tracker: Arc<ContextTracker>,
    catalog: Arc<SkillCatalog>,
    save_re: Regex,
    back_re: Regex,
    compare_re: Regex,
    action_re: Regex,
    digits_re: Regex,
}

impl IntentResolver {
    pub fn new(tracker: Arc<ContextTracker>, catalog: Arc<SkillCatalog>) -> Result<Self, regex::Error> {
        Ok(Self {
            tracker,
            catalog,
            save_re: Regex::new(
                r"(?i)\b(?:save|store|salva|salvare|memorizza)\b.*\b(?:this|these|that|it|them|results?|questo|questa|questi|queste|risultat[io])\b",
            )?,
            back_re: Regex::new(
                r"(?i)\b(?:go back|back to the previous|previous (?:one|analysis|result)|torna indietro|torniamo indietro|quella di prima)\b",
            )?,
            compare_re: Regex::new(
                r"(?i)\b(?:compare|comparison|confronta|confronto|which (?:one )?is better|qual[e']? (?:è )?(?:il )?miglior[ei]?|both|entramb[ei])\b",
            )?,
            action_re: Regex::new(
                r"(?i)\b(?:run|do|calculate|compute|prepare|make|redo|calcola|esegui|fai|prepara|rifai)\b.*\b(feasibility|fattibilit[aà]|business ?plan|sensitivity|sensibilit[aà])\b",
            )?,
            digits_re: Regex::new(r"\d")?,
        })
    }

    /// 按会话解析（未知会话得到新上下文，自然放弃）
    pub async fn resolve(&self, utterance: &str, session_id: &str) -> Option<ResolvedIntent> {
        let ctx = self.tracker.get_or_create(session_id).await;
        self.resolve_with(utterance, &ctx)
    }

    /// 在给定上下文快照上解析
    pub fn resolve_with(&self, utterance: &str, ctx: &SessionContext) -> Option<ResolvedIntent> {
        let extractor = self.tracker.extractor();
        let mentioned = extractor.locations_in(utterance);

        let (rule, resolved) = if self.save_re.is_match(utterance) {
            (IntentRule::SaveReference, self.resolve_save(utterance, ctx, extractor))
        } else if self.back_re.is_match(utterance) {
            (IntentRule::GoBack, self.resolve_back(ctx))
        } else if mentioned.len() >= 2 {
            (IntentRule::CompareLocations, Some(compare(mentioned, "named in the request")))
        } else if self.compare_re.is_match(utterance) {
            (IntentRule::CompareLocations, self.resolve_implicit_compare(ctx))
        } else if let Some(caps) = self.action_re.captures(utterance) {
            if self.digits_re.is_match(utterance) {
                // 带显式数值参数的请求交给模型
                return None;
            }
            let keyword = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            (
                IntentRule::ParameterlessAction,
                self.resolve_action(&keyword, mentioned.first().cloned(), ctx),
            )
        } else {
            return None;
        };

        let Some((skill, arguments, reasoning)) = resolved else {
            tracing::debug!(?rule, "intent rule matched but context is missing, deferring");
            return None;
        };
        if !self.catalog.contains(&skill) {
            tracing::debug!(?rule, skill = %skill, "intent target not registered, deferring");
            return None;
        }
        tracing::info!(?rule, skill = %skill, "intent resolved without model call");
        Some(ResolvedIntent {
            forced_skill_id: skill,
            arguments,
            reasoning,
            rule,
        })
    }

    fn resolve_save(
        &self,
        utterance: &str,
        ctx: &SessionContext,
        extractor: &EntityExtractor,
    ) -> Option<(String, Map<String, Value>, String)> {
        let last = ctx.last_operation()?;
        let project_name = extractor
            .projects_in(utterance)
            .into_iter()
            .next()
            .or_else(|| last.input_str("project_name").map(str::to_string))
            .or_else(|| last.input_str("location").map(str::to_string))
            .or_else(|| ctx.current.project_name.clone())
            .or_else(|| ctx.current.location.clone())?;

        let mut args = Map::new();
        args.insert("project_name".into(), json!(project_name));
        args.insert("operation".into(), json!(last.kind.as_str()));
        args.insert("data".into(), last.result.clone());
        Some((
            PROJECT_SAVE.to_string(),
            args,
            format!("'save' refers to the last operation: {}", last.summary),
        ))
    }

    fn resolve_back(&self, ctx: &SessionContext) -> Option<(String, Map<String, Value>, String)> {
        let previous = ctx.previous_operation()?;
        Some((
            previous.skill_id.clone(),
            previous.inputs.clone(),
            format!("going back to the previous operation: {}", previous.summary),
        ))
    }

    fn resolve_implicit_compare(&self, ctx: &SessionContext) -> Option<(String, Map<String, Value>, String)> {
        let known = ctx.entities(EntityCategory::Location);
        if known.len() < 2 {
            return None;
        }
        Some(compare(known, "mentioned earlier in the session"))
    }

    fn resolve_action(
        &self,
        keyword: &str,
        named_location: Option<String>,
        ctx: &SessionContext,
    ) -> Option<(String, Map<String, Value>, String)> {
        let skill = if keyword.starts_with("feasib") || keyword.starts_with("fattib") {
            FEASIBILITY_ANALYSIS
        } else if keyword.starts_with("business") {
            BUSINESS_PLAN
        } else {
            SENSITIVITY_ANALYSIS
        };
        let location = named_location.or_else(|| ctx.current.location.clone())?;

        let mut args = Map::new();
        args.insert("location".into(), json!(location));
        if skill == SENSITIVITY_ANALYSIS {
            // 敏感性分析需要一个基础分析结果
            let base = ctx
                .operations()
                .rev()
                .find(|op| matches!(op.kind, OperationKind::Feasibility | OperationKind::BusinessPlan))
                .map(|op| op.result.clone())?;
            args.insert("base".into(), base);
        }
        Some((
            skill.to_string(),
            args,
            format!("'{}' requested without explicit parameters, using location {}", keyword, location),
        ))
    }
}

fn compare(locations: Vec<String>, origin: &str) -> (String, Map<String, Value>, String) {
    let mut args = Map::new();
    args.insert("locations".into(), json!(locations));
    (
        LOCATION_COMPARE.to_string(),
        args,
        format!("comparing locations {}: {}", origin, locations.join(", ")),
    )
}
