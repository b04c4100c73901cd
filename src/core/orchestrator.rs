//! 编排器：一轮请求/响应
//!
//! handle_turn 的顺序：
//! 1. 若该会话有待确认的调用：肯定回答则执行，否定回答则丢弃，其他输入丢弃后按新请求处理
//! 2. 意图预解析 → 会话摘要 → 决策
//! 3. 执行（技能调用逐个执行并记入上下文 / 工作流运行并记录结果）
//! 4. 护栏校验（修正或拒答）
//! 5. 记忆写入交给后台 writer，不阻塞回复
//!
//! 整轮受 turn 超时约束：超时后决策阶段立即放弃，工作流在当前步骤完成后停止。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::context::{ContextTracker, Operation};
use crate::core::{CoreError, RecoveryEngine};
use crate::decision::{
    Action, ActionKind, Decision, DecisionEngine, DecisionInput, DecisionSource, FunctionCall,
    IntentResolver, WorkflowPlan,
};
use crate::guardrails::{GuardrailValidator, UserContext, ValidationReport};
use crate::memory::{Importance, MemoryRetriever, MemoryWriter, NewMemory, RecordKind};
use crate::resilience::{normalize, BreakerSet, BreakerSnapshot, CacheMetrics, ResponseCache};
use crate::skills::{ExecutionContext, SkillExecutor};
use crate::workflow::{WorkflowEngine, WorkflowRegistry, WorkflowResult};

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yep", "sure", "ok", "okay", "confirm", "confirmed", "proceed", "go ahead", "sì", "si",
    "conferma", "confermo", "procedi", "vai",
];
const NEGATIVE: &[&str] = &["no", "n", "nope", "cancel", "stop", "annulla", "lascia perdere", "non procedere"];

/// 单轮请求
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub session_id: String,
    pub utterance: String,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, utterance: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            utterance: utterance.into(),
        }
    }
}

/// 已执行的技能调用
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedCall {
    pub skill_id: String,
    pub arguments: Map<String, Value>,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// 单轮响应
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub text: String,
    pub action: ActionKind,
    pub source: DecisionSource,
    /// 本轮的调用已暂存，等待用户确认
    pub awaiting_confirmation: bool,
    pub executed: Vec<ExecutedCall>,
    pub workflow: Option<WorkflowResult>,
    pub guardrail: ValidationReport,
    /// 执行无失败且护栏通过
    pub success: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// 暂存的待确认决策
pub(crate) struct PendingConfirmation {
    decision: Decision,
    parked_at: Instant,
}

/// 执行阶段的产出
#[derive(Default)]
struct Execution {
    text: String,
    executed: Vec<ExecutedCall>,
    workflow: Option<WorkflowResult>,
    failed: bool,
    awaiting_confirmation: bool,
}

pub struct Orchestrator {
    pub(crate) config: AppConfig,
    pub(crate) tracker: Arc<ContextTracker>,
    pub(crate) resolver: IntentResolver,
    pub(crate) decision: DecisionEngine,
    pub(crate) executor: Arc<SkillExecutor>,
    pub(crate) workflows: Arc<WorkflowRegistry>,
    pub(crate) workflow_engine: WorkflowEngine,
    pub(crate) guardrails: GuardrailValidator,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) retriever: Arc<MemoryRetriever>,
    pub(crate) writer: MemoryWriter,
    pub(crate) breakers: BreakerSet,
    pub(crate) cache: Option<Arc<ResponseCache<Decision>>>,
    pub(crate) background: CancellationToken,
    pub(crate) pending: Mutex<HashMap<String, PendingConfirmation>>,
}

impl Orchestrator {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ContextTracker> {
        &self.tracker
    }

    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    pub fn retriever(&self) -> &Arc<MemoryRetriever> {
        &self.retriever
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn cache_metrics(&self) -> Option<CacheMetrics> {
        self.cache.as_ref().map(|c| c.metrics())
    }

    /// 该会话是否有待确认的调用
    pub async fn has_pending_confirmation(&self, session_id: &str) -> bool {
        self.pending.lock().await.contains_key(session_id)
    }

    pub async fn handle_turn(&self, req: TurnRequest) -> TurnResponse {
        let start = Instant::now();
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(self.config.orchestrator.turn_timeout_secs);
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };
        let exec = ExecutionContext::new(&req.user_id, &req.session_id);

        let pending = self.pending.lock().await.remove(&req.session_id);
        let (decision, confirmed) = match pending {
            Some(parked) => match confirmation_reply(&req.utterance) {
                Some(true) => {
                    tracing::info!(
                        session = %req.session_id,
                        waited_ms = parked.parked_at.elapsed().as_millis() as u64,
                        "pending action confirmed"
                    );
                    (parked.decision, true)
                }
                Some(false) => {
                    tracing::info!(session = %req.session_id, "pending action declined");
                    let d = Decision::conversation(
                        "Okay, I won't proceed. Is there anything else I can do for you?",
                        DecisionSource::Fallback,
                    )
                    .with_confidence(1.0);
                    (d, false)
                }
                None => {
                    tracing::info!(session = %req.session_id, "pending action dropped by a new request");
                    (self.decide(&req, &cancel).await, false)
                }
            },
            None => (self.decide(&req, &cancel).await, false),
        };

        let execution = if decision.requires_confirmation && !confirmed {
            self.park(&req.session_id, &decision).await
        } else {
            self.execute(&decision, &req, &exec, &cancel).await
        };

        let invocations: Vec<FunctionCall> = decision.calls().to_vec();
        let guarded = self.guardrails.enforce(
            &req.utterance,
            &execution.text,
            &invocations,
            &UserContext::new(&req.user_id, &req.session_id),
        );

        self.remember(&req, &decision, &execution, &guarded.text);

        let timed_out = cancel.is_cancelled();
        timer.abort();
        let success = !execution.failed && guarded.report.passed && !guarded.refused && !timed_out;
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            session = %req.session_id,
            action = ?decision.kind(),
            success,
            timed_out,
            duration_ms,
            "turn finished"
        );

        TurnResponse {
            text: guarded.text,
            action: decision.kind(),
            source: decision.source,
            awaiting_confirmation: execution.awaiting_confirmation,
            executed: execution.executed,
            workflow: execution.workflow,
            guardrail: guarded.report,
            success,
            timed_out,
            duration_ms,
        }
    }

    async fn decide(&self, req: &TurnRequest, cancel: &CancellationToken) -> Decision {
        let ctx = self.tracker.get_or_create(&req.session_id).await;
        let resolved = self.resolver.resolve_with(&req.utterance, &ctx);
        let input = DecisionInput {
            utterance: req.utterance.clone(),
            user_id: req.user_id.clone(),
            session_id: req.session_id.clone(),
            summary: ctx.summary(),
            resolved,
        };
        tokio::select! {
            decision = self.decision.decide(&input) => decision,
            _ = cancel.cancelled() => {
                tracing::warn!(session = %req.session_id, "turn timed out while deciding");
                Decision::conversation(
                    self.recovery.handle(&CoreError::Cancelled).message(),
                    DecisionSource::Fallback,
                )
                .with_reasoning("turn timeout")
            }
        }
    }

    async fn park(&self, session_id: &str, decision: &Decision) -> Execution {
        let targets: Vec<String> = match &decision.action {
            Action::FunctionCall { calls } => calls.iter().map(|c| c.skill_id.clone()).collect(),
            Action::Workflow { plan } => vec![plan.name.clone()],
            _ => Vec::new(),
        };
        self.pending.lock().await.insert(
            session_id.to_string(),
            PendingConfirmation {
                decision: decision.clone(),
                parked_at: Instant::now(),
            },
        );
        tracing::info!(session = %session_id, targets = ?targets, "action parked until confirmed");
        Execution {
            text: format!(
                "This will run {}. Do you want me to proceed? (yes / no)",
                targets.join(", ")
            ),
            awaiting_confirmation: true,
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        decision: &Decision,
        req: &TurnRequest,
        exec: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Execution {
        match &decision.action {
            Action::FunctionCall { calls } => self.execute_calls(calls, req, exec, cancel).await,
            Action::Workflow { plan } => self.run_workflow(plan, req, exec, cancel).await,
            Action::Conversation { response }
            | Action::Clarification { question: response }
            | Action::Escalation { message: response } => Execution {
                text: response.clone(),
                ..Default::default()
            },
        }
    }

    /// 逐个执行调用；首个失败或超时后停止
    async fn execute_calls(
        &self,
        calls: &[FunctionCall],
        req: &TurnRequest,
        exec: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Execution {
        let mut out = Execution::default();
        let mut lines = Vec::new();

        for call in calls {
            if cancel.is_cancelled() {
                out.failed = true;
                lines.push(self.recovery.handle(&CoreError::Cancelled).message().to_string());
                break;
            }
            let args = Value::Object(call.arguments.clone());
            match self.executor.execute(&call.skill_id, &args, exec).await {
                Ok(result) => {
                    let op = Operation::new(&call.skill_id, call.arguments.clone(), result.clone());
                    lines.push(describe_result(&op.summary, &result));
                    self.tracker.record_operation(&req.session_id, op).await;
                    out.executed.push(ExecutedCall {
                        skill_id: call.skill_id.clone(),
                        arguments: call.arguments.clone(),
                        ok: true,
                        result: Some(result),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(skill = %call.skill_id, error = %e, "skill call failed");
                    lines.push(self.recovery.handle(&e).message().to_string());
                    out.executed.push(ExecutedCall {
                        skill_id: call.skill_id.clone(),
                        arguments: call.arguments.clone(),
                        ok: false,
                        result: None,
                        error: Some(e.to_string()),
                    });
                    out.failed = true;
                    break;
                }
            }
        }

        out.text = lines.join("\n");
        out
    }

    async fn run_workflow(
        &self,
        plan: &WorkflowPlan,
        req: &TurnRequest,
        exec: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Execution {
        let workflow = match self.workflows.get(&plan.name) {
            Ok(wf) => wf,
            Err(e) => {
                return Execution {
                    text: self.recovery.handle(&CoreError::Workflow(e)).message().to_string(),
                    failed: true,
                    ..Default::default()
                }
            }
        };

        let result = self
            .workflow_engine
            .run(workflow, plan.arguments.clone(), exec.clone(), cancel)
            .await;

        for step_id in &result.completed_steps {
            let (Some(step), Some(value)) = (
                workflow.steps.iter().find(|s| &s.id == step_id),
                result.results.get(step_id),
            ) else {
                continue;
            };
            let op = Operation::new(&step.skill_id, plan.arguments.clone(), value.clone());
            self.tracker.record_operation(&req.session_id, op).await;
        }
        self.tracker
            .record_workflow_result(&req.session_id, &plan.name, result.summary_value())
            .await;

        let text = if result.success {
            let mut text = format!(
                "Workflow '{}' completed: {}.",
                plan.name,
                result.completed_steps.join(", ")
            );
            if !result.skipped_steps.is_empty() {
                text.push_str(&format!(" Skipped: {}.", result.skipped_steps.join(", ")));
            }
            text
        } else if result.cancelled {
            format!(
                "{} Steps completed before stopping: {}.",
                self.recovery.handle(&CoreError::Cancelled).message(),
                none_if_empty(&result.completed_steps)
            )
        } else {
            format!(
                "Workflow '{}' stopped at step '{}': {}. Steps completed before the failure: {}.",
                plan.name,
                result.failed_steps.first().map(String::as_str).unwrap_or("?"),
                result.error.as_deref().unwrap_or("unknown error"),
                none_if_empty(&result.completed_steps)
            )
        };

        Execution {
            text,
            failed: !result.success,
            workflow: Some(result),
            ..Default::default()
        }
    }

    fn remember(&self, req: &TurnRequest, decision: &Decision, execution: &Execution, reply: &str) {
        let importance = match decision.kind() {
            ActionKind::FunctionCall | ActionKind::Workflow => Importance::High,
            ActionKind::Escalation => Importance::High,
            ActionKind::Clarification => Importance::Low,
            ActionKind::Conversation => Importance::Normal,
        };
        self.writer.submit(
            NewMemory::turn(
                &req.user_id,
                &req.session_id,
                format!("User: {}\nAssistant: {}", req.utterance, reply),
            )
            .with_importance(importance),
        );

        for call in execution.executed.iter().filter(|c| c.ok) {
            let content = serde_json::json!({
                "skill": call.skill_id,
                "arguments": call.arguments,
                "result": call.result,
            });
            self.writer.submit(
                NewMemory::turn(&req.user_id, &req.session_id, content.to_string())
                    .with_kind(RecordKind::SkillExecution)
                    .with_importance(Importance::High),
            );
        }
        if let Some(result) = &execution.workflow {
            self.writer.submit(
                NewMemory::turn(&req.user_id, &req.session_id, result.summary_value().to_string())
                    .with_kind(RecordKind::SkillExecution)
                    .with_importance(Importance::High),
            );
        }
    }

    /// 清理过期会话、超时未确认的调用与过期记忆
    pub async fn cleanup_expired(&self) -> usize {
        let sessions = self.tracker.cleanup_expired().await;
        let ttl = Duration::from_secs(self.config.context.session_ttl_secs);
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|_, p| p.parked_at.elapsed() < ttl);
        }
        match self.retriever.store().prune().await {
            Ok(pruned) if pruned > 0 => tracing::debug!(pruned, "memory records pruned"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "memory prune failed"),
        }
        sessions
    }

    /// 停止后台任务并等待记忆写完
    pub async fn shutdown(&self) {
        self.background.cancel();
        self.writer.shutdown().await;
        tracing::info!(
            written = self.writer.written(),
            failed = self.writer.failed(),
            "orchestrator stopped"
        );
    }
}

/// 解析确认回复：Some(true) 肯定，Some(false) 否定，None 不是确认回复
pub fn confirmation_reply(utterance: &str) -> Option<bool> {
    let text = normalize(utterance);
    let text = text.trim_end_matches(|c: char| c.is_ascii_punctuation()).trim();
    let first = text.split(|c: char| c == ',' || c.is_whitespace()).next().unwrap_or("");
    if NEGATIVE.contains(&text) || NEGATIVE.contains(&first) {
        Some(false)
    } else if AFFIRMATIVE.contains(&text) || AFFIRMATIVE.contains(&first) {
        Some(true)
    } else {
        None
    }
}

fn describe_result(summary: &str, result: &Value) -> String {
    if let Some(message) = result.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    let compact = result.to_string();
    let shown = if compact.chars().count() > 300 {
        format!("{}…", compact.chars().take(300).collect::<String>())
    } else {
        compact
    };
    format!("Done: {}. Result: {}", summary, shown)
}

fn none_if_empty(steps: &[String]) -> String {
    if steps.is_empty() {
        "none".to_string()
    } else {
        steps.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_reply() {
        assert_eq!(confirmation_reply("Yes"), Some(true));
        assert_eq!(confirmation_reply("sì, procedi!"), Some(true));
        assert_eq!(confirmation_reply("go ahead"), Some(true));
        assert_eq!(confirmation_reply("no thanks"), Some(false));
        assert_eq!(confirmation_reply("annulla"), Some(false));
        assert_eq!(confirmation_reply("what about Rome?"), None);
    }

    #[test]
    fn test_describe_result_prefers_message() {
        assert_eq!(
            describe_result("save via project_save", &serde_json::json!({"message": "Saved project Turin"})),
            "Saved project Turin"
        );
        assert!(describe_result("query via x", &serde_json::json!({"a": 1})).starts_with("Done: query via x"));
    }
}
