//! 编排器集成测试：规划 -> 派发 -> 校验 -> 重试/替换 -> History -> Judge

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use toolflow::capability::{CapabilityEntry, CapabilityRegistry};
    use toolflow::config::AppConfig;
    use toolflow::core::{
        spawn_session, FlowError, Orchestrator, SessionState, TurnContext, TurnOutcome,
    };
    use toolflow::eval::{ArgRules, TruncationMode};
    use toolflow::flow::{EventSink, ExecutionKind, FlowEvent, JudgeCategory};
    use toolflow::llm::mock::PromptKind;
    use toolflow::llm::{MockLlmClient, ScriptedLlmClient};
    use toolflow::plan::StepStatus;
    use toolflow::tools::{ExecutorRegistry, JobStatus, MockExecutor, ToolOutcome, ToolResult};

    fn registry() -> Arc<CapabilityRegistry> {
        Arc::new(
            CapabilityRegistry::from_entries(vec![
                CapabilityEntry::new("calc_energy", "dpa")
                    .with_description("Compute the total energy of a structure."),
                CapabilityEntry::new("relax_a", "dpa").with_alternatives(["relax_b"]),
                CapabilityEntry::new("relax_b", "abacus"),
                CapabilityEntry::new("submit_job", "abacus"),
                CapabilityEntry::new("web-search", "nav"),
            ])
            .unwrap(),
        )
    }

    fn orchestrator(
        llm: &Arc<ScriptedLlmClient>,
        executors: &[Arc<MockExecutor>],
        tweak: impl FnOnce(&mut AppConfig),
    ) -> Orchestrator {
        let mut cfg = AppConfig::default();
        tweak(&mut cfg);
        let mut executor_registry = ExecutorRegistry::new();
        for e in executors {
            executor_registry.register_arc(e.clone());
        }
        Orchestrator::new(llm.clone(), registry(), executor_registry, &cfg)
    }

    fn plan_of(tools: &[&str]) -> String {
        let steps: Vec<_> = tools
            .iter()
            .enumerate()
            .map(|(i, t)| {
                serde_json::json!({
                    "tool_name": t,
                    "description": format!("step {} with {}", i + 1, t),
                    "feasibility": "listed tool",
                    "status": "plan"
                })
            })
            .collect();
        serde_json::json!({ "steps": steps }).to_string()
    }

    fn completed(text: &str) -> Result<ToolOutcome, String> {
        Ok(ToolOutcome::Completed(ToolResult::text(text)))
    }

    fn ctx() -> TurnContext {
        TurnContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn test_single_tool_succeeds_first_try() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args(r#"{"formula": "Si"}"#)
                .on_validate(r#"{"passed": true, "reason": "energy is reported in eV"}"#)
                .on_judge(r#"{"finished": true, "reason": "The energy of Si was computed: -5.4 eV."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let orch = orchestrator(&llm, &[dpa.clone()], |_| {});

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();

        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
        assert_eq!(state.plan.len(), 1);
        assert_eq!(state.plan.steps()[0].status, StepStatus::Success);
        assert_eq!(state.history.len(), 1);
        assert_eq!(dpa.invocations()[0].1["formula"], "Si");
        assert!(report.render().contains("E = -5.4 eV"));
    }

    #[tokio::test]
    async fn test_two_failures_without_alternatives_is_terminal() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "energy is positive, structure is unphysical"}"#)
                .on_validate(r#"{"passed": false, "reason": "energy is still positive"}"#)
                .on_judge(
                    r#"{"finished": true, "reason": "NOT completed and cannot be completed: calc_energy failed validation twice with a positive energy."}"#,
                ),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = +3 eV"));
        dpa.push("calc_energy", completed("E = +2 eV"));
        let orch = orchestrator(&llm, &[dpa.clone()], |c| c.orchestrator.max_tool_retries = 2);

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();

        let step = &state.plan.steps()[0];
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.retry_count, 2);
        assert_eq!(step.validation_failure_reason.as_deref(), Some("energy is still positive"));
        assert_eq!(dpa.invocation_count("calc_energy"), 2);
        // 重试的参数生成看到了上一次的失败原因
        assert!(llm.prompts(PromptKind::Args)[1].contains("energy is positive, structure is unphysical"));
        // Judge 只在 Step 进入终态后调用一次
        assert_eq!(llm.calls(PromptKind::Judge), 1);
        assert_eq!(state.history.len(), 1);

        assert_eq!(report.category(), Some(JudgeCategory::Unachievable));
        let text = report.render();
        assert!(text.contains("NOT completed"));
        assert!(text.contains("tried calc_energy: energy is still positive"));
    }

    #[tokio::test]
    async fn test_substitution_swaps_tool_and_drops_annotation() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["relax_a"]))
                .on_args("{}")
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "forces not converged"}"#)
                .on_validate(r#"{"passed": true, "reason": "converged"}"#)
                .on_judge(r#"{"finished": true, "reason": "The structure was relaxed."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("relax_a", completed("fmax = 1.2"));
        let abacus = Arc::new(MockExecutor::new("abacus"));
        abacus.push("relax_b", completed("fmax = 0.01"));
        let orch = orchestrator(&llm, &[dpa.clone(), abacus.clone()], |c| {
            c.orchestrator.max_tool_retries = 1
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ctx().with_events(EventSink::new(tx));
        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "relax Si", &ctx).await.unwrap();

        let step = &state.plan.steps()[0];
        assert_eq!(step.tool_name, "relax_b");
        assert_eq!(step.lineage(), &["relax_a".to_string(), "relax_b".to_string()]);
        assert!(!step.description().contains("forces not converged"));
        assert_eq!(step.retry_count, 1);
        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(abacus.invocation_count("relax_b"), 1);
        assert!(report.is_finished());

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        let switched = events
            .iter()
            .position(|e| matches!(e, FlowEvent::ToolSwitched { from, to, .. } if from == "relax_a" && to == "relax_b"))
            .expect("tool switch event");
        assert!(events[switched..].iter().any(|e| matches!(
            e,
            FlowEvent::ToolStarting { tool, kind: ExecutionKind::SwitchedTool, .. } if tool == "relax_b"
        )));
    }

    #[tokio::test]
    async fn test_submitted_job_ends_turn_and_short_circuits() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["submit_job"]))
                .on_args(r#"{"input": "Si.cif"}"#)
                .on_validate(r#"{"passed": true, "reason": "job finished with results"}"#)
                .on_judge(r#"{"finished": true, "reason": "The relaxation job completed."}"#),
        );
        let abacus = Arc::new(MockExecutor::new("abacus"));
        abacus.push(
            "submit_job",
            Ok(ToolOutcome::Submitted {
                job_id: "job-1".into(),
                status: "Running".into(),
            }),
        );
        let orch = orchestrator(&llm, &[abacus.clone()], |_| {});
        let mut state = SessionState::new();

        let report = orch.run_turn(&mut state, "relax Si with DFT", &ctx()).await.unwrap();
        assert!(matches!(report.outcome, TurnOutcome::Waiting { ref job_id, .. } if job_id == "job-1"));
        assert_eq!(state.plan.steps()[0].status, StepStatus::Submitted);
        assert_eq!(llm.calls(PromptKind::Validate), 0);
        assert_eq!(llm.calls(PromptKind::Judge), 0);

        // 下一轮用户输入：仍在运行，不再调用工具
        abacus.push_job_status("job-1", JobStatus::Running);
        let report = orch.run_turn(&mut state, "is it done?", &ctx()).await.unwrap();
        assert!(matches!(report.outcome, TurnOutcome::Waiting { .. }));
        assert_eq!(abacus.invocation_count("submit_job"), 1);
        assert_eq!(llm.calls(PromptKind::Validate), 0);
        assert_eq!(llm.calls(PromptKind::Plan), 1);

        let err = orch
            .complete_job(&mut state, "job-2", JobStatus::Running, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::UnknownJob("job-2".into()));

        let report = orch
            .complete_job(
                &mut state,
                "job-1",
                JobStatus::Completed(ToolResult::text("E = -5.4 eV").with_artifacts(["https://oss/relaxed.cif"])),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
        assert_eq!(llm.calls(PromptKind::Validate), 1);
        assert_eq!(abacus.invocation_count("submit_job"), 1);
        assert_eq!(state.artifacts, vec!["https://oss/relaxed.cif"]);
    }

    #[tokio::test]
    async fn test_poll_resumes_completed_job() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["submit_job"]))
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": true, "reason": "done"}"#),
        );
        let abacus = Arc::new(MockExecutor::new("abacus"));
        abacus.push(
            "submit_job",
            Ok(ToolOutcome::Submitted {
                job_id: "job-7".into(),
                status: "Running".into(),
            }),
        );
        abacus.push_job_status("job-7", JobStatus::Completed(ToolResult::text("result")));
        let orch = orchestrator(&llm, &[abacus.clone()], |_| {});
        let mut state = SessionState::new();

        orch.run_turn(&mut state, "run it", &ctx()).await.unwrap();
        let report = orch.poll(&mut state, &ctx()).await.unwrap();
        assert!(report.is_finished());
        assert_eq!(abacus.status_queries(), vec!["job-7"]);
        assert!(state.waiting_job().is_none());
    }

    #[tokio::test]
    async fn test_judge_never_gives_up_with_untried_remedy() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_plan(plan_of(&["web-search"]))
                .on_args("{}")
                .on_args(r#"{"query": "Si total energy"}"#)
                .on_validate(r#"{"passed": false, "reason": "the service is down; try web-search for a reference value"}"#)
                .on_validate(r#"{"passed": true, "reason": "reference value found"}"#)
                .on_judge(r#"{"finished": true, "reason": "NOT completed, unachievable: the energy service is down."}"#)
                .on_judge(r#"{"finished": true, "reason": "A reference energy was found."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("503 Service Unavailable"));
        let nav = Arc::new(MockExecutor::new("nav"));
        nav.push("web-search", completed("Si: -5.42 eV/atom"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |c| c.orchestrator.max_tool_retries = 1);

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();

        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
        assert_eq!(state.history.entries()[0].remedies, vec!["web-search"]);
        assert_eq!(llm.calls(PromptKind::Plan), 2);
        assert!(llm.prompts(PromptKind::Plan)[1].contains("failed"));
        assert_eq!(nav.invocation_count("web-search"), 1);
        // 失败的 Step 保留在 Plan 中，新计划接在其后
        let statuses: Vec<_> = state.plan.steps().iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Success]);
    }

    #[tokio::test]
    async fn test_dispatch_error_is_treated_as_failed_validation() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": true, "reason": "done"}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", Err("connection refused".into()));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let orch = orchestrator(&llm, &[dpa.clone()], |_| {});

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap();
        assert!(report.is_finished());
        // 派发错误不经 Validator
        assert_eq!(llm.calls(PromptKind::Validate), 1);
        let step = &state.plan.steps()[0];
        assert_eq!(step.retry_count, 1);
        assert!(step.description().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failed_step_blocks_when_replans_exhausted() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy", "web-search"]))
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "wrong element"}"#)
                .on_judge(r#"{"finished": false, "reason": "energy still missing"}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E(C) = -9 eV"));
        let nav = Arc::new(MockExecutor::new("nav"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |c| {
            c.orchestrator.max_tool_retries = 1;
            c.orchestrator.max_replans = 0;
        });

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
        assert!(matches!(
            report.outcome,
            TurnOutcome::Blocked { step: 0, ref reason, .. } if reason == "wrong element"
        ));
        // 不会越过失败的 Step 自动推进
        assert_eq!(nav.invocation_count("web-search"), 0);
        assert_eq!(state.plan.steps()[1].status, StepStatus::Plan);
    }

    #[tokio::test]
    async fn test_plan_only_truncation() {
        let llm = Arc::new(ScriptedLlmClient::new().on_plan(plan_of(&["calc_energy", "web-search"])));
        let dpa = Arc::new(MockExecutor::new("dpa"));
        let orch = orchestrator(&llm, &[dpa.clone()], |_| {});
        let mut state = SessionState::new().with_truncation(TruncationMode::PlanOnly {
            expected_tools: vec!["calc_energy".into()],
        });

        let report = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap();
        match report.outcome {
            TurnOutcome::Truncated { mode, report } => {
                assert_eq!(mode, "plan_only");
                assert!(report.passed);
                assert_eq!(report.extra_tools, vec!["web-search"]);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(dpa.invocations().is_empty());
        assert!(state.history.is_empty());
        assert!(state.plan.steps().iter().all(|s| s.status == StepStatus::Plan));
        assert_eq!(llm.calls(PromptKind::Args), 0);
    }

    #[tokio::test]
    async fn test_first_call_truncation_checks_arguments() {
        let rules = HashMap::from([(
            "calc_energy".to_string(),
            ArgRules {
                required_keys: vec!["formula".into()],
                key_values: HashMap::from([("formula".to_string(), serde_json::json!("Si"))]),
                ..Default::default()
            },
        )]);
        for (args, expect_pass) in [(r#"{"formula": "Si"}"#, true), (r#"{"formula": "Ge"}"#, false)] {
            let llm = Arc::new(
                ScriptedLlmClient::new()
                    .on_plan(plan_of(&["calc_energy"]))
                    .on_args(args),
            );
            let dpa = Arc::new(MockExecutor::new("dpa"));
            let orch = orchestrator(&llm, &[dpa.clone()], |_| {});
            let mut state = SessionState::new().with_truncation(TruncationMode::FirstCall {
                expected_tools: vec!["calc_energy".into()],
                expected_args: rules.clone(),
            });

            let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
            match report.outcome {
                TurnOutcome::Truncated { mode, report } => {
                    assert_eq!(mode, "first_call");
                    assert_eq!(report.passed, expect_pass, "{}", report.reason);
                }
                other => panic!("expected truncation, got {other:?}"),
            }
            assert!(dpa.invocations().is_empty());
            assert!(state.history.is_empty());
            assert_eq!(state.plan.steps()[0].status, StepStatus::Plan);
        }
    }

    #[tokio::test]
    async fn test_planner_failure_is_fatal() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan("sure, let me think")
                .on_plan(r#"{"steps": []}"#),
        );
        let orch = orchestrator(&llm, &[], |_| {});
        let mut state = SessionState::new();
        let err = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap_err();
        assert!(matches!(err, FlowError::PlannerMalformedOutput { attempts: 2, .. }));
        assert!(state.plan.is_empty());
    }

    #[tokio::test]
    async fn test_judge_schema_violation_is_surfaced() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": true, "reason": "ok", "category": "satisfied"}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let orch = orchestrator(&llm, &[dpa], |_| {});
        let mut state = SessionState::new();
        let err = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap_err();
        assert!(matches!(err, FlowError::JudgeSchemaViolation(_)));
        // History 已写入，且未被默认成任何结论
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_session_makes_no_calls() {
        let llm = Arc::new(ScriptedLlmClient::new().on_plan(plan_of(&["calc_energy"])));
        let orch = orchestrator(&llm, &[], |_| {});
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = SessionState::new();
        let err = orch
            .run_turn(&mut state, "energy", &TurnContext::new(cancel))
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
        assert_eq!(llm.calls(PromptKind::Plan), 0);
    }

    #[tokio::test]
    async fn test_session_actor_with_mock_llm() {
        let cfg = AppConfig::default();
        let orch = Arc::new(Orchestrator::new(
            Arc::new(MockLlmClient),
            Arc::new(CapabilityRegistry::new()),
            ExecutorRegistry::new(),
            &cfg,
        ));
        let mut session = spawn_session(orch, SessionState::new(), EventSink::none());
        let watcher = session.watch();
        session.submit("what is a phonon").unwrap();
        let report = session.next_report().await.unwrap().unwrap();
        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
        assert!(report.render().contains("Echo from Mock"));
        assert_eq!(session.snapshot().history_len, 1);
        assert_eq!(watcher.borrow().history_len, 1);

        session.cancel();
        assert!(session.next_report().await.is_none());
    }

    #[tokio::test]
    async fn test_finished_on_failure_without_keywords_respects_remedies() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "service down; try web-search for a reference value"}"#)
                .on_judge(r#"{"finished": true, "reason": "The goal could not be achieved because calc_energy is down."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("503 Service Unavailable"));
        let orch = orchestrator(&llm, &[dpa], |c| {
            c.orchestrator.max_tool_retries = 1;
            c.orchestrator.max_replans = 0;
        });

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
        assert_eq!(state.history.entries()[0].remedies, vec!["web-search"]);
        assert!(!report.is_finished());
        assert!(matches!(report.outcome, TurnOutcome::Blocked { step: 0, .. }));
        assert!(!report.render().contains("Goal satisfied"));
    }

    #[tokio::test]
    async fn test_finished_on_failure_without_keywords_reports_not_completed() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "wrong element"}"#)
                .on_judge(r#"{"finished": true, "reason": "Gave up after calc_energy returned the wrong element."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E(C) = -9 eV"));
        let orch = orchestrator(&llm, &[dpa], |c| c.orchestrator.max_tool_retries = 1);

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
        assert_eq!(report.category(), Some(JudgeCategory::Unachievable));
        let text = report.render();
        assert!(text.contains("NOT completed"));
        assert!(text.contains("tried calc_energy: wrong element"));
    }

    #[tokio::test]
    async fn test_remedy_from_earlier_retry_keeps_session_going() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_plan(plan_of(&["web-search"]))
                .on_args("{}")
                .on_args("{}")
                .on_args(r#"{"query": "Si total energy"}"#)
                .on_validate(r#"{"passed": false, "reason": "service down; try web-search for a reference value"}"#)
                .on_validate(r#"{"passed": false, "reason": "still down"}"#)
                .on_validate(r#"{"passed": true, "reason": "reference value found"}"#)
                .on_judge(r#"{"finished": true, "reason": "NOT completed and cannot be completed: calc_energy is down."}"#)
                .on_judge(r#"{"finished": true, "reason": "A reference value was found."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("503"));
        dpa.push("calc_energy", completed("503"));
        let nav = Arc::new(MockExecutor::new("nav"));
        nav.push("web-search", completed("Si: -5.42 eV/atom"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |_| {});

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
        let first = &state.history.entries()[0];
        assert_eq!(first.failures.len(), 2);
        assert_eq!(first.remedies, vec!["web-search"]);
        assert_eq!(nav.invocation_count("web-search"), 1);
        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
    }

    #[tokio::test]
    async fn test_remedy_survives_tool_switch() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["relax_a"]))
                .on_args("{}")
                .on_args("{}")
                .on_validate(r#"{"passed": false, "reason": "diverged; use web-search for a better initial guess"}"#)
                .on_validate(r#"{"passed": false, "reason": "still diverged"}"#)
                .on_judge(r#"{"finished": true, "reason": "NOT completed and cannot be completed: both relaxers diverged."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("relax_a", completed("fmax = 9"));
        let abacus = Arc::new(MockExecutor::new("abacus"));
        abacus.push("relax_b", completed("fmax = 8"));
        let orch = orchestrator(&llm, &[dpa, abacus], |c| {
            c.orchestrator.max_tool_retries = 1;
            c.orchestrator.max_replans = 0;
        });

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "relax Si", &ctx()).await.unwrap();
        let entry = &state.history.entries()[0];
        let tools: Vec<_> = entry.failures.iter().map(|f| f.tool.as_str()).collect();
        assert_eq!(tools, vec!["relax_a", "relax_b"]);
        assert_eq!(entry.remedies, vec!["web-search"]);
        assert!(llm.prompts(PromptKind::Judge)[0].contains("better initial guess"));
        assert!(!report.is_finished());
    }

    #[tokio::test]
    async fn test_judge_stop_after_first_step_skips_the_rest() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy", "web-search"]))
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": true, "reason": "Energy computed: -5.4 eV."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let nav = Arc::new(MockExecutor::new("nav"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |_| {});

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si", &ctx()).await.unwrap();
        assert_eq!(report.category(), Some(JudgeCategory::Satisfied));
        assert_eq!(llm.calls(PromptKind::Judge), 1);
        assert!(nav.invocations().is_empty());
        assert_eq!(state.plan.steps()[1].status, StepStatus::Plan);
    }

    #[tokio::test]
    async fn test_judge_continue_moves_to_next_step() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy", "web-search"]))
                .on_args("{}")
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": false, "reason": "reference comparison missing"}"#)
                .on_judge(r#"{"finished": true, "reason": "Energy computed and compared."}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let nav = Arc::new(MockExecutor::new("nav"));
        nav.push("web-search", completed("reference: -5.42 eV"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |_| {});

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si vs reference", &ctx()).await.unwrap();
        assert!(report.is_finished());
        assert_eq!(llm.calls(PromptKind::Judge), 2);
        assert_eq!(nav.invocation_count("web-search"), 1);
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_step_cap_ends_turn_incomplete() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy", "web-search"]))
                .on_args("{}")
                .on_validate(r#"{"passed": true, "reason": "ok"}"#)
                .on_judge(r#"{"finished": false, "reason": "reference comparison missing"}"#),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let nav = Arc::new(MockExecutor::new("nav"));
        let orch = orchestrator(&llm, &[dpa, nav.clone()], |c| c.orchestrator.max_steps_per_turn = 1);

        let mut state = SessionState::new();
        let report = orch.run_turn(&mut state, "energy of Si vs reference", &ctx()).await.unwrap();
        assert!(matches!(report.outcome, TurnOutcome::Incomplete { ref reason } if reason.contains("limit")));
        assert!(nav.invocations().is_empty());
    }

    fn cancel_after(millis: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}"),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.stall("calc_energy");
        let orch = orchestrator(&llm, &[dpa.clone()], |_| {});

        let mut state = SessionState::new();
        let err = orch
            .run_turn(&mut state, "energy", &TurnContext::new(cancel_after(50)))
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
        assert_eq!(dpa.invocation_count("calc_energy"), 1);
        assert_eq!(llm.calls(PromptKind::Validate), 0);
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on_plan(plan_of(&["calc_energy"]))
                .on_args("{}")
                .stall(PromptKind::Validate),
        );
        let dpa = Arc::new(MockExecutor::new("dpa"));
        dpa.push("calc_energy", completed("E = -5.4 eV"));
        let orch = orchestrator(&llm, &[dpa], |_| {});

        let mut state = SessionState::new();
        let err = orch
            .run_turn(&mut state, "energy", &TurnContext::new(cancel_after(50)))
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
        assert_eq!(llm.calls(PromptKind::Validate), 1);
        assert_eq!(llm.calls(PromptKind::Judge), 0);
    }

    #[tokio::test]
    async fn test_decision_call_times_out() {
        let llm = Arc::new(ScriptedLlmClient::new().stall(PromptKind::Plan));
        let orch = orchestrator(&llm, &[], |c| c.orchestrator.decision_timeout_secs = 1);

        let mut state = SessionState::new();
        let err = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap_err();
        assert_eq!(err, FlowError::DecisionTimeout(1));
        assert_eq!(llm.calls(PromptKind::Plan), 1);
        assert!(state.plan.is_empty());
    }

    #[tokio::test]
    async fn test_model_error_is_not_retried() {
        let llm = Arc::new(ScriptedLlmClient::new().push_err(PromptKind::Plan, "rate limited"));
        let orch = orchestrator(&llm, &[], |_| {});

        let mut state = SessionState::new();
        let err = orch.run_turn(&mut state, "energy", &ctx()).await.unwrap_err();
        assert_eq!(err, FlowError::LlmError("rate limited".into()));
        assert_eq!(llm.calls(PromptKind::Plan), 1);
    }
}
