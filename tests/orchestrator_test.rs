//! Orchestrator 端到端测试：预解析、确认、护栏、超时、缓存与记忆

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use concierge::decision::{ActionKind, DecisionSource};
    use concierge::llm::{ScriptedLlmClient, ScriptedReply};
    use concierge::memory::{NewMemory, RetrievalScope};
    use concierge::TurnRequest;
    use serde_json::json;

    use crate::common::{orchestrator, test_config, Journal};

    fn turn(session: &str, utterance: &str) -> TurnRequest {
        TurnRequest::new("u1", session, utterance)
    }

    #[tokio::test]
    async fn test_save_these_results_after_feasibility() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::new());
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        let first = orch.handle_turn(turn("s1", "Run a feasibility study for Turin")).await;
        assert_eq!(first.action, ActionKind::FunctionCall);
        assert_eq!(first.source, DecisionSource::ResolvedIntent);
        assert!(first.success);

        let second = orch.handle_turn(turn("s1", "save these results")).await;
        assert_eq!(second.source, DecisionSource::ResolvedIntent);
        assert_eq!(second.executed.len(), 1);
        assert_eq!(second.executed[0].skill_id, "project_save");
        assert_eq!(second.executed[0].arguments["project_name"], json!("Turin"));
        assert_eq!(second.text, "Saved project Turin");

        assert_eq!(llm.calls(), 0);
        assert_eq!(journal.entries(), vec!["run:feasibility_analysis", "run:project_save"]);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_compare_two_named_locations() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::new());
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        let resp = orch.handle_turn(turn("s1", "Compare Milan and Rome")).await;
        assert_eq!(resp.action, ActionKind::FunctionCall);
        assert_eq!(resp.executed[0].skill_id, "location_compare");
        assert_eq!(resp.executed[0].arguments["locations"], json!(["Milan", "Rome"]));
        assert_eq!(llm.calls(), 0);

        let ctx = orch.tracker().get_or_create("s1").await;
        assert_eq!(ctx.last_operation().unwrap().skill_id, "location_compare");
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_sensitive_call_waits_for_confirmation() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([json!({
            "action": "function_call",
            "calls": [{"skill": "document_send", "arguments": {"to": "anna@example.com"}}],
            "confidence": 0.9
        })
        .to_string()]));
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        let parked = orch.handle_turn(turn("s1", "send the business plan to Anna")).await;
        assert!(parked.awaiting_confirmation);
        assert!(parked.executed.is_empty());
        assert!(parked.text.contains("document_send"));
        assert!(journal.entries().is_empty());
        assert!(orch.has_pending_confirmation("s1").await);

        let confirmed = orch.handle_turn(turn("s1", "yes")).await;
        assert!(!confirmed.awaiting_confirmation);
        assert_eq!(confirmed.text, "Document sent");
        assert_eq!(journal.entries(), vec!["run:document_send"]);
        assert!(!orch.has_pending_confirmation("s1").await);
        assert_eq!(llm.calls(), 1);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_declined_confirmation_runs_nothing() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([json!({
            "action": "function_call",
            "calls": [{"skill": "document_send", "arguments": {"to": "anna@example.com"}}]
        })
        .to_string()]));
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        orch.handle_turn(turn("s1", "send it to Anna")).await;
        let declined = orch.handle_turn(turn("s1", "no")).await;
        assert!(declined.text.contains("won't proceed"));
        assert!(declined.executed.is_empty());
        assert!(journal.entries().is_empty());
        assert!(!orch.has_pending_confirmation("s1").await);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_card_number_is_removed_from_reply() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([
            "Sure. The card on file is 4111 1111 1111 1111 and it expires next year.",
        ]));
        let orch = orchestrator(test_config(), llm, &journal);

        let resp = orch.handle_turn(turn("s1", "which card do you have for me?")).await;
        assert_eq!(resp.action, ActionKind::Conversation);
        assert!(!resp.text.contains("4111"));
        assert!(resp.text.contains("[removed]"));
        assert!(resp.guardrail.passed);
        assert!(resp.success);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_analysis_workflow_end_to_end() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([json!({
            "action": "workflow",
            "workflow": "full_analysis",
            "arguments": {"location": "Turin", "project_name": "Turin Hub"}
        })
        .to_string()]));
        let orch = orchestrator(test_config(), llm, &journal);

        let resp = orch.handle_turn(turn("s1", "give me the complete picture for a site in Turin")).await;
        assert_eq!(resp.action, ActionKind::Workflow);
        assert!(resp.success);
        let wf = resp.workflow.as_ref().unwrap();
        assert_eq!(wf.completed_steps, vec!["feasibility", "business_plan", "save"]);
        assert!(resp.text.contains("completed"));
        assert_eq!(
            journal.entries(),
            vec!["run:feasibility_analysis", "run:business_plan", "run:project_save"]
        );

        let ctx = orch.tracker().get_or_create("s1").await;
        assert_eq!(ctx.operation_count(), 3);
        assert_eq!(ctx.last_operation().unwrap().skill_id, "project_save");
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_turn_timeout_stops_waiting_for_model() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push(ScriptedReply::Delayed(Duration::from_secs(10), "too late".into()));
        let mut cfg = test_config();
        cfg.orchestrator.turn_timeout_secs = 1;
        let orch = orchestrator(cfg, llm, &journal);

        let resp = orch.handle_turn(turn("s1", "tell me a long story about Naples")).await;
        assert!(resp.timed_out);
        assert!(!resp.success);
        assert!(resp.text.contains("took too long"));
        assert!(resp.duration_ms < 5_000);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_question_is_served_from_cache() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([json!({
            "action": "conversation",
            "response": "I can run feasibility studies and business plans for your sites."
        })
        .to_string()]));
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        let first = orch.handle_turn(turn("s1", "what can you do for me?")).await;
        assert_eq!(first.source, DecisionSource::Model);
        let second = orch.handle_turn(turn("s1", "what can you do for me?")).await;
        assert_eq!(second.source, DecisionSource::Cache);
        assert_eq!(second.text, first.text);
        assert_eq!(llm.calls(), 1);
        assert!(orch.cache_metrics().unwrap().hits >= 1);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_cached_reply_stays_with_its_user() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([
            "Last time you asked about the Verona feasibility for Villa Rossi.",
            "I don't have any earlier conversation with you yet.",
        ]));
        let orch = orchestrator(test_config(), llm.clone(), &journal);
        orch.retriever()
            .save(NewMemory::turn("u1", "s1", "Verona feasibility for Villa Rossi"))
            .await
            .unwrap();

        let own = orch.handle_turn(turn("s1", "what did we discuss last time?")).await;
        assert_eq!(own.source, DecisionSource::Model);

        let other = orch
            .handle_turn(TurnRequest::new("u2", "s9", "what did we discuss last time?"))
            .await;
        assert_eq!(other.source, DecisionSource::Model);
        assert_ne!(other.text, own.text);
        assert!(!other.text.contains("Villa Rossi"));
        assert_eq!(llm.calls(), 2);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_plain_reply_with_braces_reaches_user() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([
            "Profit is computed as {revenue - cost}; for Turin it is about 1.2M.",
        ]));
        let orch = orchestrator(test_config(), llm, &journal);

        let resp = orch.handle_turn(turn("s1", "how do you compute profit?")).await;
        assert_eq!(resp.action, ActionKind::Conversation);
        assert_eq!(resp.source, DecisionSource::Model);
        assert!(resp.text.contains("{revenue - cost}"));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_turns_are_remembered_and_recalled() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies([
            "Milan has strong demand for coworking spaces near the stations.",
            "Happy to help with that.",
        ]));
        let orch = orchestrator(test_config(), llm.clone(), &journal);

        orch.handle_turn(turn("s1", "is there demand for coworking in Milan?")).await;
        orch.writer().flush().await;

        let found = orch
            .retriever()
            .search(
                "coworking",
                &RetrievalScope {
                    user_id: "u1".into(),
                    session_id: Some("s1".into()),
                },
                5,
            )
            .await
            .unwrap();
        assert!(!found.is_empty());

        orch.handle_turn(turn("s1", "and what about the costs there?")).await;
        let prompt = llm.last_messages().unwrap();
        assert!(prompt[0].content.contains("coworking"));
        orch.shutdown().await;
        assert!(orch.writer().written() >= 2);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_keywords() {
        let journal = Journal::default();
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push(ScriptedReply::Fail("connection reset".into()));
        let orch = orchestrator(test_config(), llm, &journal);

        let resp = orch.handle_turn(turn("s1", "hello")).await;
        assert_eq!(resp.action, ActionKind::Conversation);
        assert_eq!(resp.source, DecisionSource::Fallback);
        assert!(!resp.text.is_empty());
        orch.shutdown().await;
    }
}
