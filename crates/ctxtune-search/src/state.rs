//! Per-model search state
//!
//! The state is a plain value. [`SearchState::advance`] consumes it together
//! with a trial's result and decision and yields either the next state or the
//! model's outcome, so the whole state machine is testable without any I/O.

use ctxtune_core::{Decision, ModelInfo, ModelOutcome, SearchBounds, StopReason, TrialConfig, TrialResult};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub model: ModelInfo,
    pub current_context_size: u32,
    pub step_size: u32,
    pub max_context_size: u32,
    /// Trials run so far for this model
    pub trials: usize,
    pub last_successful: Option<TrialResult>,
}

/// What follows a recorded trial
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Run another trial at the new state's context size
    Ready(SearchState),
    /// The search for this model is over
    Terminated(ModelOutcome),
}

impl SearchState {
    /// Fresh state positioned at the start of the bounds
    pub fn new(model: ModelInfo, bounds: &SearchBounds) -> Self {
        Self {
            model,
            current_context_size: bounds.start_context_size,
            step_size: bounds.step_size,
            max_context_size: bounds.max_context_size,
            trials: 0,
            last_successful: None,
        }
    }

    /// The trial to run from this state
    pub fn trial_config(&self, tokens_to_generate: u32, warmup: bool) -> TrialConfig {
        TrialConfig::new(
            self.model.name.clone(),
            self.current_context_size,
            tokens_to_generate,
        )
        .with_warmup(warmup)
    }

    /// Context size after this one, if it fits under the ceiling
    pub fn next_context_size(&self) -> Option<u32> {
        self.current_context_size
            .checked_add(self.step_size)
            .filter(|next| *next <= self.max_context_size)
    }

    /// Fold one trial into the state. Returns the finalized result, with its
    /// stop reason attached when the search ends here, and the transition.
    pub fn advance(self, result: TrialResult, decision: Decision) -> (TrialResult, Transition) {
        let trials = self.trials + 1;

        match decision {
            Decision::Stop { reason, detail } => {
                let result = if result.stop_reason.is_some() {
                    result
                } else {
                    result.with_stop(reason, detail.clone())
                };
                let outcome = ModelOutcome {
                    model: self.model,
                    trials,
                    sweet_spot: self.last_successful,
                    termination: reason,
                    detail,
                };
                (result, Transition::Terminated(outcome))
            }
            Decision::Continue => match self.next_context_size() {
                Some(next) => {
                    let state = SearchState {
                        current_context_size: next,
                        trials,
                        last_successful: Some(result.clone()),
                        ..self
                    };
                    (result, Transition::Ready(state))
                }
                None => {
                    let detail = format!("reached max context {}", self.max_context_size);
                    let result = result.with_stop(StopReason::MaxContextReached, detail.clone());
                    let outcome = ModelOutcome {
                        model: self.model,
                        trials,
                        sweet_spot: Some(result.clone()),
                        termination: StopReason::MaxContextReached,
                        detail,
                    };
                    (result, Transition::Terminated(outcome))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtune_core::{FailureKind, TrialFailure};

    fn ok_result(state: &SearchState) -> TrialResult {
        let mut result = TrialResult::new(state.trial_config(100, true));
        result.eval_speed_tps = Some(20.0);
        result
    }

    fn expect_ready(transition: Transition) -> SearchState {
        match transition {
            Transition::Ready(state) => state,
            Transition::Terminated(outcome) => panic!("terminated early: {:?}", outcome.termination),
        }
    }

    fn expect_terminated(transition: Transition) -> ModelOutcome {
        match transition {
            Transition::Terminated(outcome) => outcome,
            Transition::Ready(state) => panic!("still running at {}", state.current_context_size),
        }
    }

    #[test]
    fn test_steps_forward_until_ceiling() {
        let bounds = SearchBounds::new(2048, 8192, 2048);
        let mut state = SearchState::new(ModelInfo::new("llama3"), &bounds);
        let mut visited = Vec::new();

        let outcome = loop {
            visited.push(state.current_context_size);
            let result = ok_result(&state);
            let (result, transition) = state.advance(result, Decision::Continue);
            match transition {
                Transition::Ready(next) => {
                    assert!(result.stop_reason.is_none());
                    state = next;
                }
                Transition::Terminated(outcome) => {
                    assert_eq!(result.stop_reason, Some(StopReason::MaxContextReached));
                    break outcome;
                }
            }
        };

        assert_eq!(visited, vec![2048, 4096, 6144, 8192]);
        assert_eq!(visited, bounds.planned_sizes());
        assert_eq!(outcome.termination, StopReason::MaxContextReached);
        assert_eq!(outcome.sweet_spot_context(), Some(8192));
        assert_eq!(outcome.trials, 4);
    }

    #[test]
    fn test_partial_final_step_is_skipped() {
        let bounds = SearchBounds::new(4096, 10000, 4096);
        let state = SearchState::new(ModelInfo::new("llama3"), &bounds);
        let result = ok_result(&state);
        let state = expect_ready(state.advance(result, Decision::Continue).1);
        assert_eq!(state.current_context_size, 8192);

        let result = ok_result(&state);
        let outcome = expect_terminated(state.advance(result, Decision::Continue).1);
        assert_eq!(outcome.sweet_spot_context(), Some(8192));
    }

    #[test]
    fn test_stop_keeps_previous_sweet_spot() {
        let bounds = SearchBounds::new(2048, 8192, 2048);
        let state = SearchState::new(ModelInfo::new("llama3"), &bounds);
        let result = ok_result(&state);
        let state = expect_ready(state.advance(result, Decision::Continue).1);

        let result = ok_result(&state);
        let (result, transition) = state.advance(
            result,
            Decision::stop(StopReason::SpeedBelowMinimum, "3.00 t/s below minimum 5.00 t/s"),
        );
        let outcome = expect_terminated(transition);

        assert_eq!(result.stop_reason, Some(StopReason::SpeedBelowMinimum));
        assert_eq!(outcome.termination, StopReason::SpeedBelowMinimum);
        assert_eq!(outcome.sweet_spot_context(), Some(2048));
        assert_eq!(outcome.trials, 2);
    }

    #[test]
    fn test_first_trial_violation_has_no_sweet_spot() {
        let bounds = SearchBounds::new(2048, 8192, 2048);
        let state = SearchState::new(ModelInfo::new("llama3"), &bounds);
        let failed = TrialResult::failed(
            state.trial_config(100, true),
            TrialFailure::new(FailureKind::Connection, "refused"),
        );
        let (result, transition) = state.advance(
            failed,
            Decision::stop(StopReason::TrialFailed(FailureKind::Connection), "refused"),
        );
        let outcome = expect_terminated(transition);

        assert!(outcome.sweet_spot.is_none());
        assert_eq!(outcome.termination.name(), "trial failed");
        assert_eq!(result.stop_detail.as_deref(), Some("connection: refused"));
    }

    #[test]
    fn test_overflow_is_ceiling() {
        let bounds = SearchBounds::new(u32::MAX - 1, u32::MAX, 4096);
        let state = SearchState::new(ModelInfo::new("llama3"), &bounds);
        assert_eq!(state.next_context_size(), None);
    }
}
