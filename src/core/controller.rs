//! 主控循环
//!
//! 一轮 = Perceive → Expand → Retrieve → Reflect → Plan → Schedule → Act → Compose → Persist，
//! 之后交付回复并回到 Perceive。
//!
//! - 关闭信号只在阶段边界检查；Perceive 等待输入时与关闭信号竞争，且只持有输入源的锁
//! - Act 是唯一的并发点：任务经信号量限流后并发分发，全部结束后才进入 Compose，结果保持任务顺序
//! - Compose 产出回复后，Persist 与交付一定完成（不再检查关闭信号）
//! - 各阶段错误交给 RecoveryEngine 决定降级、重试、放弃本轮或终止

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentRegistry, AgentResult, AgentTask};
use crate::cognition::{parse_plan, summarize_experience, Expanded, Expander, Plan, PromptBuilder};
use crate::config::{CycleSection, MalformedPlanPolicy};
use crate::core::task_scheduler::{schedule, TaskScheduler};
use crate::core::{CoreError, CycleEvent, CyclePhase, CycleState, RecoveryAction, RecoveryEngine};
use crate::io::{InputSource, ResponseSink};
use crate::llm::LlmClient;
use crate::memory::MemoryStore;

const PREVIEW_CHARS: usize = 80;

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        p.push_str("...");
    }
    p
}

/// 单轮结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum CycleStatus {
    /// 回复已交付
    Completed,
    /// 在某阶段放弃，没有回复
    Aborted { phase: CyclePhase, error: CoreError },
}

/// 单轮结果：结束方式与全部中间值
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub state: CycleState,
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == CycleStatus::Completed
    }

    pub fn response(&self) -> Option<&str> {
        self.state.response.as_deref()
    }
}

/// run() 的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles_completed: u64,
    pub cycles_aborted: u64,
    pub responses_delivered: u64,
}

/// 可克隆的停止句柄
#[derive(Clone)]
pub struct LoopHandle {
    token: CancellationToken,
}

impl LoopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 主控循环构建器
pub struct LoopBuilder {
    memory: Option<Arc<MemoryStore>>,
    registry: Option<Arc<AgentRegistry>>,
    llm: Option<Arc<dyn LlmClient>>,
    input: Option<Box<dyn InputSource>>,
    sink: Option<Arc<dyn ResponseSink>>,
    cycle: CycleSection,
    persona: Option<String>,
    token: Option<CancellationToken>,
    events: Option<mpsc::UnboundedSender<CycleEvent>>,
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self {
            memory: None,
            registry: None,
            llm: None,
            input: None,
            sink: None,
            cycle: CycleSection::default(),
            persona: None,
            token: None,
            events: None,
        }
    }

    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// 不设置时使用空注册表
    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn input(mut self, input: impl InputSource + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    pub fn sink(mut self, sink: impl ResponseSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// [cycle] 段：top_k、并发上限、规划与组合失败策略
    pub fn config(mut self, cycle: CycleSection) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.cycle.top_k = top_k;
        self
    }

    pub fn malformed_plan(mut self, policy: MalformedPlanPolicy) -> Self {
        self.cycle.malformed_plan = policy;
        self
    }

    pub fn compose_fallback(mut self, phrase: impl Into<String>) -> Self {
        self.cycle.compose_fallback = Some(phrase.into());
        self
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// 外部关闭信号（如 ShutdownManager::token()）；不设置时新建
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn events(mut self, tx: mpsc::UnboundedSender<CycleEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Result<LoopController, CoreError> {
        let memory = self
            .memory
            .ok_or_else(|| CoreError::Validation("loop requires a memory store".to_string()))?;
        let llm = self
            .llm
            .ok_or_else(|| CoreError::Validation("loop requires a generation client".to_string()))?;
        let input = self
            .input
            .ok_or_else(|| CoreError::Validation("loop requires an input source".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| CoreError::Validation("loop requires a response sink".to_string()))?;

        let prompts = match self.persona {
            Some(persona) => PromptBuilder::new().with_persona(persona),
            None => PromptBuilder::new(),
        };
        let recovery = RecoveryEngine::new()
            .with_malformed_plan(self.cycle.malformed_plan)
            .with_compose_fallback(self.cycle.compose_fallback.is_some());

        Ok(LoopController {
            memory,
            registry: self.registry.unwrap_or_else(|| Arc::new(AgentRegistry::new())),
            llm,
            input: Mutex::new(input),
            sink,
            prompts,
            expander: Expander::new(),
            recovery,
            scheduler: TaskScheduler::new(self.cycle.max_concurrent_agents),
            top_k: self.cycle.top_k,
            plan_retries: self.cycle.plan_retries,
            compose_fallback: self.cycle.compose_fallback,
            token: self.token.unwrap_or_default(),
            events: self.events,
            cycles: AtomicU64::new(0),
        })
    }
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 九阶段主控循环
pub struct LoopController {
    memory: Arc<MemoryStore>,
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LlmClient>,
    input: Mutex<Box<dyn InputSource>>,
    sink: Arc<dyn ResponseSink>,
    prompts: PromptBuilder,
    expander: Expander,
    recovery: RecoveryEngine,
    scheduler: TaskScheduler,
    top_k: usize,
    plan_retries: u32,
    compose_fallback: Option<String>,
    token: CancellationToken,
    events: Option<mpsc::UnboundedSender<CycleEvent>>,
    cycles: AtomicU64,
}

impl LoopController {
    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            token: self.token.clone(),
        }
    }

    /// 请求停止：在下一个阶段边界生效，Perceive 中的等待立即结束
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    fn emit(&self, event: CycleEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 持续运行直到收到关闭信号或输入耗尽
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        tracing::info!(top_k = self.top_k, agents = self.registry.len(), "loop started");

        let reason = loop {
            if self.token.is_cancelled() {
                break "shutdown requested";
            }
            self.emit(CycleEvent::PhaseEntered {
                cycle: self.cycles.load(Ordering::SeqCst) + 1,
                phase: CyclePhase::Perceive,
            });

            let next = {
                let mut input = self.input.lock().await;
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break "shutdown requested",
                    next = input.next_input() => next,
                }
            };
            let Some(raw) = next else {
                break "input exhausted";
            };

            match self.run_cycle(&raw).await {
                Ok(outcome) if outcome.is_completed() => {
                    summary.cycles_completed += 1;
                    summary.responses_delivered += 1;
                }
                Ok(_) => summary.cycles_aborted += 1,
                Err(e) => {
                    tracing::info!(error = %e, "cycle terminated");
                    break "shutdown requested";
                }
            }
        };

        tracing::info!(
            reason,
            completed = summary.cycles_completed,
            aborted = summary.cycles_aborted,
            "loop stopped"
        );
        self.emit(CycleEvent::Stopped {
            reason: reason.to_string(),
        });
        summary
    }

    /// 阶段边界：关闭信号已触发则返回 Cancelled
    fn enter(&self, state: &CycleState, phase: CyclePhase) -> Result<(), CoreError> {
        if self.token.is_cancelled() {
            tracing::info!(cycle = state.cycle, %phase, "shutdown observed at phase boundary");
            self.emit(CycleEvent::CycleAborted {
                cycle: state.cycle,
                phase,
                error: CoreError::Cancelled.to_string(),
            });
            return Err(CoreError::Cancelled);
        }
        self.enter_committed(state, phase);
        Ok(())
    }

    fn enter_committed(&self, state: &CycleState, phase: CyclePhase) {
        tracing::debug!(cycle = state.cycle, %phase, "phase entered");
        self.emit(CycleEvent::PhaseEntered {
            cycle: state.cycle,
            phase,
        });
    }

    fn abort(&self, state: CycleState, phase: CyclePhase, error: CoreError) -> CycleOutcome {
        tracing::warn!(
            cycle = state.cycle,
            %phase,
            kind = error.kind().as_str(),
            error = %error,
            "cycle aborted"
        );
        self.emit(CycleEvent::CycleAborted {
            cycle: state.cycle,
            phase,
            error: error.to_string(),
        });
        CycleOutcome {
            status: CycleStatus::Aborted { phase, error },
            state,
        }
    }

    /// 生成阶段失败：Terminate 返回 Err，其余放弃本轮
    fn fail(
        &self,
        state: CycleState,
        phase: CyclePhase,
        error: CoreError,
    ) -> Result<CycleOutcome, CoreError> {
        if self.recovery.handle(phase, &error) == RecoveryAction::Terminate {
            return Err(error);
        }
        Ok(self.abort(state, phase, error))
    }

    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        self.llm
            .generate(prompt)
            .await
            .map_err(CoreError::GenerationFailure)
    }

    /// 对给定输入执行一轮（Expand 起）；Err 只在观察到关闭信号时返回
    pub async fn run_cycle(&self, raw: &str) -> Result<CycleOutcome, CoreError> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = CycleState::new(cycle, raw);
        tracing::info!(cycle, input = %preview(raw), "cycle started");
        self.emit(CycleEvent::CycleStarted {
            cycle,
            input_preview: preview(raw),
        });

        // Expand
        self.enter(&state, CyclePhase::Expand)?;
        let expanded = self.expander.expand(raw);
        state.expanded = Some(expanded.clone());

        // Retrieve
        self.enter(&state, CyclePhase::Retrieve)?;
        match self.memory.search(&expanded.text, self.top_k).await {
            Ok(candidates) => {
                self.emit(CycleEvent::MemoryRecalled {
                    cycle,
                    count: candidates.len(),
                });
                state.candidates = candidates;
            }
            Err(e) => match self.recovery.handle(CyclePhase::Retrieve, &e) {
                RecoveryAction::Degrade => {
                    tracing::warn!(cycle, error = %e, "retrieval failed, continuing without memories");
                    self.emit(CycleEvent::RetrievalDegraded {
                        cycle,
                        error: e.to_string(),
                    });
                }
                _ => return self.fail(state, CyclePhase::Retrieve, e),
            },
        }

        // Reflect
        self.enter(&state, CyclePhase::Reflect)?;
        let prompt = self.prompts.reflect(&expanded, &state.candidates);
        let monologue = match self.generate(&prompt).await {
            Ok(m) => m,
            Err(e) => return self.fail(state, CyclePhase::Reflect, e),
        };
        state.monologue = Some(monologue.clone());

        // Plan
        self.enter(&state, CyclePhase::Plan)?;
        let plan = match self.plan(cycle, &expanded, &monologue).await {
            Ok(plan) => plan,
            Err(e) => return self.fail(state, CyclePhase::Plan, e),
        };
        state.plan = Some(plan.clone());

        // Schedule
        self.enter(&state, CyclePhase::Schedule)?;
        state.tasks = schedule(&plan);

        // Act
        self.enter(&state, CyclePhase::Act)?;
        state.results = self.act(cycle, &state.tasks).await;

        // Compose
        self.enter(&state, CyclePhase::Compose)?;
        let prompt = self
            .prompts
            .compose(&expanded, &monologue, &state.tasks, &state.results);
        let response = match self.generate(&prompt).await {
            Ok(r) => r,
            Err(e) => match (self.recovery.handle(CyclePhase::Compose, &e), &self.compose_fallback) {
                (RecoveryAction::Degrade, Some(fallback)) => {
                    tracing::warn!(cycle, error = %e, "compose failed, using fallback response");
                    self.emit(CycleEvent::ComposeFallback {
                        cycle,
                        error: e.to_string(),
                    });
                    fallback.clone()
                }
                _ => return self.fail(state, CyclePhase::Compose, e),
            },
        };
        state.response = Some(response.clone());

        // Persist：回复已产生，之后不再检查关闭信号
        self.enter_committed(&state, CyclePhase::Persist);
        let summary = summarize_experience(&expanded, &monologue, &response);
        match self.memory.store(&summary).await {
            Ok(id) => state.persisted = Some(id),
            Err(e) => {
                let action = self.recovery.handle(CyclePhase::Persist, &e);
                tracing::warn!(cycle, error = %e, ?action, "persist failed, response still delivered");
                self.emit(CycleEvent::PersistFailed {
                    cycle,
                    error: e.to_string(),
                });
            }
        }

        // Deliver
        self.sink.deliver(&response).await;
        self.emit(CycleEvent::ResponseDelivered {
            cycle,
            preview: preview(&response),
        });
        tracing::info!(cycle, results = state.results.len(), "cycle completed");

        Ok(CycleOutcome {
            status: CycleStatus::Completed,
            state,
        })
    }

    /// 生成并解析计划；解析失败按 malformed_plan 策略重试或降级为空计划
    async fn plan(
        &self,
        cycle: u64,
        expanded: &Expanded,
        monologue: &str,
    ) -> Result<Plan, CoreError> {
        let prompt = self
            .prompts
            .plan(expanded, monologue, &self.registry.descriptions());
        let mut attempt = 0u32;
        loop {
            let output = self.generate(&prompt).await?;
            let err = match parse_plan(&output) {
                Ok(plan) => return Ok(plan),
                Err(e) => e,
            };
            match self.recovery.handle(CyclePhase::Plan, &err) {
                RecoveryAction::RetryPhase if attempt < self.plan_retries => {
                    attempt += 1;
                    tracing::warn!(cycle, attempt, error = %err, "malformed plan, retrying");
                    self.emit(CycleEvent::PlanRetry {
                        cycle,
                        attempt,
                        error: err.to_string(),
                    });
                }
                RecoveryAction::Degrade => {
                    tracing::warn!(cycle, error = %err, "malformed plan, continuing with empty plan");
                    self.emit(CycleEvent::PlanDegraded {
                        cycle,
                        error: err.to_string(),
                    });
                    return Ok(Plan::default());
                }
                _ => return Err(err),
            }
        }
    }

    /// 并发分发全部任务（受信号量限制），结果与 tasks 顺序一致；
    /// 关闭信号触发时未完成的任务记为 Failure("cancelled")
    async fn act(&self, cycle: u64, tasks: &[AgentTask]) -> Vec<AgentResult> {
        let runs = tasks.iter().enumerate().map(|(index, task)| async move {
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => AgentResult::cancelled(),
                result = self.dispatch(task) => result,
            };
            if !result.is_success() {
                tracing::warn!(cycle, index, agent = %task.agent_name, result = %result.display_line(), "task failed");
            }
            self.emit(CycleEvent::TaskFinished {
                cycle,
                index,
                agent: task.agent_name.clone(),
                ok: result.is_success(),
                detail: result.display_line(),
            });
            result
        });
        join_all(runs).await
    }

    async fn dispatch(&self, task: &AgentTask) -> AgentResult {
        let _permit = match self.scheduler.acquire().await {
            Ok(permit) => permit,
            Err(_) => return AgentResult::failure("scheduler closed"),
        };
        self.registry.dispatch_task(task).await
    }
}
