//! 错误恢复引擎
//!
//! 根据 (阶段, CoreError) 返回 RecoveryAction，循环控制器据此决定降级、重试、放弃本轮还是终止：
//! - Retrieve / Act / Persist：吸收错误并降级
//! - Reflect / Plan / Compose：放弃本轮（Plan 解析失败与 Compose 可按配置重试或降级）
//! - 任意阶段的 Cancelled：终止 run()

use crate::config::MalformedPlanPolicy;
use crate::core::{CoreError, CyclePhase, RecoveryAction};

/// 阶段化错误恢复
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    malformed_plan: MalformedPlanPolicy,
    compose_fallback: bool,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_malformed_plan(mut self, policy: MalformedPlanPolicy) -> Self {
        self.malformed_plan = policy;
        self
    }

    /// Compose 失败时是否有备用回复可用
    pub fn with_compose_fallback(mut self, enabled: bool) -> Self {
        self.compose_fallback = enabled;
        self
    }

    pub fn handle(&self, phase: CyclePhase, err: &CoreError) -> RecoveryAction {
        if err.is_cancelled() {
            return RecoveryAction::Terminate;
        }
        match phase {
            CyclePhase::Retrieve | CyclePhase::Act | CyclePhase::Persist => RecoveryAction::Degrade,
            CyclePhase::Plan => match (err, self.malformed_plan) {
                (CoreError::ProviderFailure(_), MalformedPlanPolicy::Retry) => RecoveryAction::RetryPhase,
                (CoreError::ProviderFailure(_), MalformedPlanPolicy::EmptyPlan) => RecoveryAction::Degrade,
                _ => RecoveryAction::AbortCycle,
            },
            CyclePhase::Compose if self.compose_fallback => RecoveryAction::Degrade,
            _ => RecoveryAction::AbortCycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen_err() -> CoreError {
        CoreError::GenerationFailure("503".to_string())
    }

    fn parse_err() -> CoreError {
        CoreError::ProviderFailure("malformed plan".to_string())
    }

    #[test]
    fn test_best_effort_phases_degrade() {
        let engine = RecoveryEngine::new();
        for phase in [CyclePhase::Retrieve, CyclePhase::Act, CyclePhase::Persist] {
            assert_eq!(
                engine.handle(phase, &CoreError::ProviderFailure("x".into())),
                RecoveryAction::Degrade
            );
        }
    }

    #[test]
    fn test_generation_phases_abort() {
        let engine = RecoveryEngine::new();
        for phase in [CyclePhase::Reflect, CyclePhase::Plan, CyclePhase::Compose] {
            assert_eq!(engine.handle(phase, &gen_err()), RecoveryAction::AbortCycle);
        }
    }

    #[test]
    fn test_malformed_plan_policies() {
        let abort = RecoveryEngine::new();
        assert_eq!(abort.handle(CyclePhase::Plan, &parse_err()), RecoveryAction::AbortCycle);

        let retry = RecoveryEngine::new().with_malformed_plan(MalformedPlanPolicy::Retry);
        assert_eq!(retry.handle(CyclePhase::Plan, &parse_err()), RecoveryAction::RetryPhase);
        // 生成端本身失败不重试
        assert_eq!(retry.handle(CyclePhase::Plan, &gen_err()), RecoveryAction::AbortCycle);

        let empty = RecoveryEngine::new().with_malformed_plan(MalformedPlanPolicy::EmptyPlan);
        assert_eq!(empty.handle(CyclePhase::Plan, &parse_err()), RecoveryAction::Degrade);
    }

    #[test]
    fn test_compose_fallback() {
        let engine = RecoveryEngine::new().with_compose_fallback(true);
        assert_eq!(engine.handle(CyclePhase::Compose, &gen_err()), RecoveryAction::Degrade);
        assert_eq!(engine.handle(CyclePhase::Reflect, &gen_err()), RecoveryAction::AbortCycle);
    }

    #[test]
    fn test_cancelled_terminates_everywhere() {
        let engine = RecoveryEngine::new();
        for phase in CyclePhase::ALL {
            assert_eq!(engine.handle(phase, &CoreError::Cancelled), RecoveryAction::Terminate);
        }
    }
}
