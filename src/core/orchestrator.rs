//! 编排器：主控循环
//!
//! 一轮的流程：规划 -> 逐个 Step {参数生成 -> 派发 -> 校验 -> 重试/替换} -> 写入 History -> Judge -> 继续 / 重规划 / 停止。
//! 同一会话内严格串行，一次只执行一个 Step；Submitted 的 Step 结束本轮，只有后续轮次或显式 poll 才会继续。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityRegistry, RegistryRetriever, ToolRetriever, DIRECT_ANSWER_EXECUTOR};
use crate::config::AppConfig;
use crate::core::{FlowError, RecoveryAction, RecoveryEngine, SessionState, TurnOutcome, TurnReport};
use crate::eval::{check_tool_calls, check_tool_names, ToolCallRecord, TruncationMode};
use crate::flow::controller::untried_alternatives;
use crate::flow::{
    preview, ArgsComposer, CallGuard, ControllerDecision, EventSink, FlowEvent, Judge,
    JudgeCategory, Judgement, PlanRequest, Planner, RetryController, Validator,
};
use crate::llm::LlmClient;
use crate::plan::{HistoryStep, StepStatus, Verdict};
use crate::tools::{DirectAnswerExecutor, DispatchOutcome, Dispatcher, ExecutorRegistry, JobStatus};

/// 单轮上下文：取消令牌 + 事件发送端
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub cancel: CancellationToken,
    pub events: EventSink,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }
}

#[derive(Debug, Clone)]
struct Settings {
    max_replans: u32,
    decision_timeout: Duration,
    max_steps_per_turn: usize,
}

/// 一个 Step 结算后的去向
enum Settled {
    /// 继续推进（同一 Step 重试、换工具，或进入下一个 Step / 新计划）
    Continue,
    Stop(TurnReport),
}

pub struct Orchestrator {
    capabilities: Arc<CapabilityRegistry>,
    retriever: Arc<dyn ToolRetriever>,
    planner: Planner,
    args: ArgsComposer,
    dispatcher: Dispatcher,
    validator: Validator,
    controller: RetryController,
    judge: Judge,
    recovery: RecoveryEngine,
    settings: Settings,
}

impl Orchestrator {
    /// 未注册直答执行器时自动补上（由同一个 LLM 提供）
    pub fn new(
        llm: Arc<dyn LlmClient>,
        capabilities: Arc<CapabilityRegistry>,
        mut executors: ExecutorRegistry,
        cfg: &AppConfig,
    ) -> Self {
        if executors.get(DIRECT_ANSWER_EXECUTOR).is_none() {
            executors.register(DirectAnswerExecutor::new(llm.clone()));
        }
        let orch = &cfg.orchestrator;
        Self {
            retriever: Arc::new(RegistryRetriever::new(capabilities.clone())),
            planner: Planner::new(llm.clone(), orch.plan_attempts),
            args: ArgsComposer::new(llm.clone()),
            dispatcher: Dispatcher::new(
                capabilities.clone(),
                Arc::new(executors),
                cfg.tools.tool_timeout_secs,
            ),
            validator: Validator::new(llm.clone()),
            controller: RetryController::new(orch.max_tool_retries),
            judge: Judge::new(llm),
            recovery: RecoveryEngine::new(),
            settings: Settings {
                max_replans: orch.max_replans,
                decision_timeout: Duration::from_secs(orch.decision_timeout_secs),
                max_steps_per_turn: orch.max_steps_per_turn.max(1),
            },
            capabilities,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ToolRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    fn guard(&self, ctx: &TurnContext) -> CallGuard {
        CallGuard::new(ctx.cancel.clone(), self.settings.decision_timeout)
    }

    /// 处理一条用户输入
    ///
    /// 若当前 Step 在等待异步任务，本轮等同于一次 poll（输入不会触发新规划）。
    pub async fn run_turn(
        &self,
        state: &mut SessionState,
        request: &str,
        ctx: &TurnContext,
    ) -> Result<TurnReport, FlowError> {
        if state.waiting_job().is_some() {
            tracing::info!(session = %state.id, "async job pending, treating input as poll");
            return self.poll(state, ctx).await;
        }

        state.begin_request(request);
        tracing::info!(session = %state.id, request = %preview(request, 120), "new request");
        self.plan_into(state, None, ctx).await?;

        if let Some(mode @ TruncationMode::PlanOnly { expected_tools }) = &state.flags.truncation {
            let actual: Vec<String> = state
                .plan
                .steps()
                .iter()
                .skip(state.plan.current_index().unwrap_or(0))
                .map(|s| s.tool_name.clone())
                .collect();
            let report = check_tool_names(&actual, expected_tools);
            return Ok(self.truncated(state, mode.label(), report, ctx));
        }

        self.drive(state, ctx).await
    }

    /// 主动查询当前异步任务
    pub async fn poll(
        &self,
        state: &mut SessionState,
        ctx: &TurnContext,
    ) -> Result<TurnReport, FlowError> {
        let Some((idx, job_id)) = state.waiting_job().map(|(i, j)| (i, j.to_string())) else {
            return Err(FlowError::UnknownJob("(no submitted step)".to_string()));
        };
        let Some(step) = state.plan.step(idx).cloned() else {
            return Err(FlowError::UnknownJob(job_id));
        };
        match self.dispatcher.job_status(&step, &ctx.cancel).await? {
            Ok(status) => self.resume_job(state, idx, status, ctx).await,
            Err(e) => {
                tracing::warn!(session = %state.id, job_id = %job_id, error = %e, "job status query failed, still waiting");
                Ok(self.report(state, TurnOutcome::Waiting { step: idx, tool: step.tool_name, job_id }))
            }
        }
    }

    /// 外部推送异步任务结果
    pub async fn complete_job(
        &self,
        state: &mut SessionState,
        job_id: &str,
        status: JobStatus,
        ctx: &TurnContext,
    ) -> Result<TurnReport, FlowError> {
        let idx = match state.waiting_job() {
            Some((idx, waiting)) if waiting == job_id => idx,
            _ => return Err(FlowError::UnknownJob(job_id.to_string())),
        };
        self.resume_job(state, idx, status, ctx).await
    }

    async fn resume_job(
        &self,
        state: &mut SessionState,
        idx: usize,
        status: JobStatus,
        ctx: &TurnContext,
    ) -> Result<TurnReport, FlowError> {
        let verdict = match status {
            JobStatus::Running => {
                let step = state.plan.step(idx).cloned();
                let (tool, job_id) = step
                    .map(|s| (s.tool_name, s.job_id.unwrap_or_default()))
                    .unwrap_or_default();
                return Ok(self.report(state, TurnOutcome::Waiting { step: idx, tool, job_id }));
            }
            JobStatus::Completed(result) => {
                state.add_artifacts(&result.artifacts);
                let Some(step) = state.plan.step_mut(idx) else {
                    return Err(FlowError::UnknownJob(String::new()));
                };
                step.resume_from_job();
                step.last_outcome = Some(result.render());
                self.validate_current(state, idx, ctx).await?
            }
            JobStatus::Failed(e) => {
                let Some(step) = state.plan.step_mut(idx) else {
                    return Err(FlowError::UnknownJob(String::new()));
                };
                step.resume_from_job();
                let reason = format!("Job for '{}' failed: {}", step.tool_name, e);
                step.last_outcome = Some(reason.clone());
                Verdict::fail(reason)
            }
        };
        match self.settle(state, idx, verdict, ctx).await? {
            Settled::Stop(report) => Ok(report),
            Settled::Continue => self.drive(state, ctx).await,
        }
    }

    /// 规划并装入 Plan；prior_failure 非空时为重规划
    async fn plan_into(
        &self,
        state: &mut SessionState,
        prior_failure: Option<&str>,
        ctx: &TurnContext,
    ) -> Result<(), FlowError> {
        let capabilities = match self.retriever.retrieve(&state.request).await {
            Ok(found) => {
                let narrowed = self.capabilities.narrow(&found);
                if narrowed.is_empty() {
                    self.capabilities.capability_list()
                } else {
                    narrowed
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool retrieval failed, offering all capabilities");
                self.capabilities.capability_list()
            }
        };

        let req = PlanRequest {
            goal: &state.request,
            capabilities: &capabilities,
            prior_failure,
            upload_file: state.upload_file,
        };
        let steps = match self.planner.plan(&req, &self.capabilities, &self.guard(ctx)).await {
            Ok(steps) => steps,
            Err(e) => {
                ctx.events.emit(FlowEvent::Error { text: e.to_string() });
                return Err(e);
            }
        };
        ctx.events.emit(FlowEvent::PlanReady {
            tools: steps.iter().map(|s| s.tool_name.clone()).collect(),
            replan: prior_failure.is_some(),
        });
        state.plan.extend(steps);
        Ok(())
    }

    /// 推进当前 Step 直到本轮结束
    async fn drive(
        &self,
        state: &mut SessionState,
        ctx: &TurnContext,
    ) -> Result<TurnReport, FlowError> {
        let mut dispatched = 0usize;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            let Some(idx) = state.plan.current_index() else {
                let failed = state
                    .plan
                    .steps()
                    .iter()
                    .rposition(|s| s.status == StepStatus::Failed)
                    .filter(|_| state.plan.is_blocked())
                    .and_then(|i| state.plan.step(i).map(|s| (i, s)));
                let outcome = match failed {
                    Some((i, s)) => TurnOutcome::Blocked {
                        step: i,
                        tool: s.tool_name.clone(),
                        reason: s.validation_failure_reason.clone().unwrap_or_default(),
                    },
                    None => TurnOutcome::Incomplete {
                        reason: "the plan has no remaining steps".to_string(),
                    },
                };
                return Ok(self.report(state, outcome));
            };
            if dispatched >= self.settings.max_steps_per_turn {
                return Ok(self.report(
                    state,
                    TurnOutcome::Incomplete {
                        reason: format!(
                            "reached the limit of {} tool calls in one turn",
                            self.settings.max_steps_per_turn
                        ),
                    },
                ));
            }

            let Some(step) = state.plan.step(idx).cloned() else {
                return Err(FlowError::UnknownJob(String::new()));
            };

            // 重新进入仍在等待的 Step：派发器短路，不再调用工具
            if step.status == StepStatus::Submitted {
                let (outcome, _) = self.dispatcher.dispatch(idx, &step, &ctx.cancel, &ctx.events).await?;
                let job_id = match outcome {
                    DispatchOutcome::AlreadySubmitted { job_id } => job_id,
                    _ => step.job_id.clone().unwrap_or_default(),
                };
                return Ok(self.report(state, TurnOutcome::Waiting { step: idx, tool: step.tool_name, job_id }));
            }

            let entry = self.capabilities.get(&step.tool_name).cloned();
            let prior_outputs = prior_outputs(state);
            let composed = self
                .args
                .compose(&state.request, &step, entry.as_ref(), &prior_outputs, &self.guard(ctx))
                .await;
            let args = match composed {
                Ok(v) => Ok(v),
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::FoldIntoValidation(reason) => Err(reason),
                    _ => return Err(e),
                },
            };

            let first_call = dispatched == 0
                && state.replans == 0
                && state.history.len() == state.history_floor
                && step.status == StepStatus::Plan;
            if first_call {
                if let Some(mode @ TruncationMode::FirstCall { expected_tools, expected_args }) =
                    &state.flags.truncation
                {
                    let label = mode.label();
                    let record = ToolCallRecord {
                        tool_name: step.tool_name.clone(),
                        args: args.clone().unwrap_or(serde_json::Value::Null),
                    };
                    let report = check_tool_calls(&[record], expected_tools, expected_args);
                    if let (Some(s), Ok(v)) = (state.plan.step_mut(idx), args) {
                        s.args = Some(v);
                    }
                    return Ok(self.truncated(state, label, report, ctx));
                }
            }

            let Some(current) = state.plan.step_mut(idx) else {
                return Err(FlowError::UnknownJob(String::new()));
            };
            current.mark_in_progress();
            let args = match args {
                Ok(v) => {
                    current.args = Some(v);
                    None
                }
                Err(reason) => {
                    current.args = None;
                    Some(reason)
                }
            };
            let step = current.clone();

            let outcome = match args {
                Some(reason) => DispatchOutcome::Error(reason),
                None => {
                    dispatched += 1;
                    self.dispatcher.dispatch(idx, &step, &ctx.cancel, &ctx.events).await?.0
                }
            };

            let verdict = match outcome {
                DispatchOutcome::Submitted { job_id } | DispatchOutcome::AlreadySubmitted { job_id } => {
                    if let Some(s) = state.plan.step_mut(idx) {
                        s.mark_submitted(job_id.clone());
                    }
                    ctx.events.emit(FlowEvent::JobSubmitted {
                        step: idx,
                        tool: step.tool_name.clone(),
                        job_id: job_id.clone(),
                    });
                    return Ok(self.report(state, TurnOutcome::Waiting { step: idx, tool: step.tool_name, job_id }));
                }
                DispatchOutcome::Completed(result) => {
                    state.add_artifacts(&result.artifacts);
                    if let Some(s) = state.plan.step_mut(idx) {
                        s.last_outcome = Some(result.render());
                    }
                    self.validate_current(state, idx, ctx).await?
                }
                DispatchOutcome::Error(reason) => {
                    // 派发失败与「结果不对」同一条路径，失败原因即派发错误
                    tracing::warn!(session = %state.id, step = idx, tool = %step.tool_name, error = %reason, "dispatch error");
                    if let Some(s) = state.plan.step_mut(idx) {
                        s.last_outcome = Some(reason.clone());
                    }
                    Verdict::fail(reason)
                }
            };

            if let Settled::Stop(report) = self.settle(state, idx, verdict, ctx).await? {
                return Ok(report);
            }
        }
    }

    async fn validate_current(
        &self,
        state: &SessionState,
        idx: usize,
        ctx: &TurnContext,
    ) -> Result<Verdict, FlowError> {
        let Some(step) = state.plan.step(idx) else {
            return Err(FlowError::UnknownJob(String::new()));
        };
        let entry = self.capabilities.get(&step.tool_name);
        let alternatives = self.capabilities.alternatives(&step.tool_name);
        let outcome = step.last_outcome.as_deref().unwrap_or("");
        match self
            .validator
            .validate(&state.request, step, outcome, entry, &alternatives, &self.guard(ctx))
            .await
        {
            Ok(v) => Ok(v),
            Err(e) => {
                ctx.events.emit(FlowEvent::Error { text: e.to_string() });
                Err(e)
            }
        }
    }

    /// 把校验结论交给控制器；Step 进入终态时写 History 并调用 Judge
    async fn settle(
        &self,
        state: &mut SessionState,
        idx: usize,
        verdict: Verdict,
        ctx: &TurnContext,
    ) -> Result<Settled, FlowError> {
        let Some(step) = state.plan.step_mut(idx) else {
            return Err(FlowError::UnknownJob(String::new()));
        };
        let tool = step.tool_name.clone();
        ctx.events.emit(FlowEvent::Validation {
            step: idx,
            tool: tool.clone(),
            passed: verdict.passed,
            reason: verdict.reason.clone(),
        });

        let decision = self.controller.apply(step, &verdict, &self.capabilities);
        match &decision {
            ControllerDecision::Retry { retry_count } => {
                tracing::warn!(session = %state.id, step = idx, tool = %tool, retry_count, reason = %verdict.reason, "validation failed, retrying");
                ctx.events.emit(FlowEvent::Retry {
                    step: idx,
                    tool,
                    retry_count: *retry_count,
                });
                return Ok(Settled::Continue);
            }
            ControllerDecision::Substitute { from, to } => {
                tracing::warn!(session = %state.id, step = idx, from = %from, to = %to, reason = %verdict.reason, "validation failed, switching tool");
                ctx.events.emit(FlowEvent::ToolSwitched {
                    step: idx,
                    from: from.clone(),
                    to: to.clone(),
                });
                return Ok(Settled::Continue);
            }
            ControllerDecision::Success => {
                tracing::info!(session = %state.id, step = idx, tool = %tool, "step succeeded");
            }
            ControllerDecision::Fail { reason } => {
                tracing::warn!(session = %state.id, step = idx, tool = %tool, reason = %reason, "step failed");
                ctx.events.emit(FlowEvent::StepFailed {
                    step: idx,
                    tool: tool.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let remedies = if verdict.passed {
            Vec::new()
        } else {
            // 谱系内每次失败提到的工具都算补救，包括换工具之前的
            let mut remedies = untried_alternatives(step, &self.capabilities);
            let reasons = step
                .failures()
                .iter()
                .map(|f| f.reason.as_str())
                .chain(std::iter::once(verdict.reason.as_str()));
            for reason in reasons {
                for mentioned in self.capabilities.mentioned_in(reason) {
                    if !step.has_tried(&mentioned) && !remedies.contains(&mentioned) {
                        remedies.push(mentioned);
                    }
                }
            }
            remedies
        };
        let snapshot = HistoryStep::snapshot(idx, step, verdict, remedies);
        state.history.append(snapshot);

        let judgement = self
            .judge
            .judge(
                &state.request,
                &state.request_history(),
                &state.artifacts,
                &self.guard(ctx),
            )
            .await
            .inspect_err(|e| ctx.events.emit(FlowEvent::Error { text: e.to_string() }))?;
        ctx.events.emit(FlowEvent::Judged {
            finished: judgement.finished,
            category: judgement.category.as_str().to_string(),
            reason: judgement.reason.clone(),
        });

        if judgement.finished {
            let outcome = TurnOutcome::Finished {
                category: judgement.category,
                reason: judgement.reason.clone(),
            };
            return Ok(Settled::Stop(self.report(state, outcome)));
        }

        match decision {
            ControllerDecision::Fail { reason } => {
                if state.replans < self.settings.max_replans {
                    let context = failure_context(idx, state, &reason, &judgement);
                    self.replan(state, &context, ctx).await?;
                    Ok(Settled::Continue)
                } else {
                    Ok(Settled::Stop(self.report(
                        state,
                        TurnOutcome::Blocked { step: idx, tool, reason },
                    )))
                }
            }
            _ if state.plan.current_index().is_none() => {
                if state.replans < self.settings.max_replans {
                    let context = format!(
                        "All planned steps ran, but the goal is not complete yet: {}",
                        judgement.reason
                    );
                    self.replan(state, &context, ctx).await?;
                    Ok(Settled::Continue)
                } else {
                    Ok(Settled::Stop(self.report(
                        state,
                        TurnOutcome::Incomplete { reason: judgement.reason },
                    )))
                }
            }
            _ => Ok(Settled::Continue),
        }
    }

    async fn replan(
        &self,
        state: &mut SessionState,
        context: &str,
        ctx: &TurnContext,
    ) -> Result<(), FlowError> {
        state.replans += 1;
        tracing::info!(session = %state.id, replans = state.replans, "re-planning with failure context");
        ctx.events.emit(FlowEvent::Replanning {
            reason: context.to_string(),
        });
        self.plan_into(state, Some(context), ctx).await
    }

    fn truncated(
        &self,
        state: &SessionState,
        mode: &str,
        report: crate::eval::ConformanceReport,
        ctx: &TurnContext,
    ) -> TurnReport {
        tracing::info!(session = %state.id, mode, passed = report.passed, "truncated");
        ctx.events.emit(FlowEvent::Truncated {
            mode: mode.to_string(),
        });
        self.report(
            state,
            TurnOutcome::Truncated {
                mode: mode.to_string(),
                report,
            },
        )
    }

    fn report(&self, state: &SessionState, outcome: TurnOutcome) -> TurnReport {
        let history = state.request_history();
        let answer = history
            .entries()
            .iter()
            .rev()
            .find(|e| e.status == StepStatus::Success)
            .and_then(|e| e.outcome.clone());
        TurnReport {
            session_id: state.id.clone(),
            outcome,
            answer,
            exhausted: history.exhausted_attempts(),
        }
    }
}

/// 本次请求中已成功 Step 的输出摘要，供参数生成串联前后步骤
fn prior_outputs(state: &SessionState) -> String {
    state
        .request_history()
        .entries()
        .iter()
        .filter(|e| e.status == StepStatus::Success)
        .map(|e| {
            format!(
                "- step {} ({}): {}",
                e.step_index + 1,
                e.tool_name,
                preview(e.outcome.as_deref().unwrap_or(""), 500)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn failure_context(idx: usize, state: &SessionState, reason: &str, judgement: &Judgement) -> String {
    let tried = state
        .plan
        .step(idx)
        .map(|s| s.lineage().join(" -> "))
        .unwrap_or_default();
    let mut out = format!(
        "Step {} (tools tried: {}) failed: {}",
        idx + 1,
        tried,
        reason
    );
    if judgement.category == JudgeCategory::Continue {
        out.push_str("\nJudge: ");
        out.push_str(&judgement.reason);
    }
    out
}
