//! Stop-criteria evaluation
//!
//! A pure function of one finalized trial and the thresholds. Checks run in
//! [`Criterion::PRECEDENCE`] order and the first violation wins. A threshold
//! that is unset, or whose metric was not measured, is skipped.

use ctxtune_core::{bytes_to_gib, Criterion, Decision, StopCriteria, StopReason, TrialResult};

/// Decide whether the search may continue past this trial
pub fn evaluate(result: &TrialResult, criteria: &StopCriteria) -> Decision {
    Criterion::PRECEDENCE
        .iter()
        .find_map(|criterion| check(*criterion, result, criteria))
        .unwrap_or(Decision::Continue)
}

/// Every criterion this trial violates, in precedence order
pub fn violations(result: &TrialResult, criteria: &StopCriteria) -> Vec<Criterion> {
    Criterion::PRECEDENCE
        .iter()
        .copied()
        .filter(|criterion| check(*criterion, result, criteria).is_some())
        .collect()
}

/// Evaluate a single criterion; `None` means satisfied, unset, or not evaluable
pub fn check(criterion: Criterion, result: &TrialResult, criteria: &StopCriteria) -> Option<Decision> {
    match criterion {
        Criterion::TrialFailure => result
            .failure
            .as_ref()
            .map(|failure| Decision::stop(StopReason::TrialFailed(failure.kind), failure.to_string())),

        Criterion::VramBudget => {
            let used = result.vram_used_bytes()?;
            if let Some(budget) = criteria.max_vram_budget_bytes {
                if used > budget {
                    return Some(Decision::stop(
                        StopReason::VramBudget,
                        format!(
                            "VRAM {:.2} GiB exceeds budget {:.2} GiB",
                            bytes_to_gib(used),
                            bytes_to_gib(budget)
                        ),
                    ));
                }
            }
            let (reserve, total) = (criteria.min_free_vram_bytes?, result.vram_total_bytes?);
            let free = total.saturating_sub(used);
            (free < reserve).then(|| {
                Decision::stop(
                    StopReason::VramBudget,
                    format!(
                        "free VRAM {:.2} GiB below required {:.2} GiB",
                        bytes_to_gib(free),
                        bytes_to_gib(reserve)
                    ),
                )
            })
        }

        Criterion::SysRamSpillover => {
            let limit = criteria.max_sys_ram_spillover_bytes?;
            let spill = result.sys_ram_spillover_bytes()?;
            (spill > limit).then(|| {
                Decision::stop(
                    StopReason::SysRamSpillover,
                    format!(
                        "system RAM spillover {:.2} GiB exceeds {:.2} GiB",
                        bytes_to_gib(spill),
                        bytes_to_gib(limit)
                    ),
                )
            })
        }

        Criterion::GenerationSpeed => {
            let min = criteria.min_generation_speed_tps?;
            let speed = result.eval_speed_tps?;
            (speed < min).then(|| {
                Decision::stop(
                    StopReason::SpeedBelowMinimum,
                    format!("{:.2} t/s below minimum {:.2} t/s", speed, min),
                )
            })
        }

        Criterion::ResponseTime => {
            let max = criteria.max_response_time_seconds?;
            let took = result.response_time_seconds?;
            (took > max).then(|| {
                Decision::stop(
                    StopReason::ResponseTimeExceeded,
                    format!("response took {:.1} s, limit {:.1} s", took, max),
                )
            })
        }

        Criterion::GpuUtilization => {
            let min = criteria.min_gpu_percent.filter(|m| *m > 0.0)?;
            let gpu = result.gpu_percent()?;
            (gpu < min).then(|| {
                Decision::stop(
                    StopReason::GpuBelowMinimum,
                    format!("GPU {:.1}% below minimum {:.1}%", gpu, min),
                )
            })
        }

        Criterion::ContextFill => {
            let ratio = criteria.min_context_fill?;
            let actual = result.actual_context_size?;
            let target = result.config.target_context_size;
            ((actual as f64) < ratio * target as f64).then(|| {
                Decision::stop(
                    StopReason::ContextTruncated,
                    format!("server used {} of {} requested context tokens", actual, target),
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtune_core::{FailureKind, LogRecord, TrialConfig, TrialFailure, GIB};
    use proptest::prelude::*;

    fn healthy(target: u32) -> TrialResult {
        let mut result = TrialResult::new(TrialConfig::new("llama3", target, 100));
        result.actual_context_size = Some(target);
        result.actual_generated_tokens = Some(100);
        result.eval_speed_tps = Some(40.0);
        result.prompt_speed_tps = Some(900.0);
        result.response_time_seconds = Some(10.0);
        result.peak_gpu_percent = Some(98.0);
        result.peak_vram_bytes = Some(10 * GIB);
        result.vram_total_bytes = Some(24 * GIB);
        result.peak_sys_ram_bytes = Some(12 * GIB);
        result.baseline_sys_ram_bytes = Some(11 * GIB);
        result
    }

    fn strict() -> StopCriteria {
        StopCriteria::new()
            .with_min_generation_speed(5.0)
            .with_max_vram(20 * GIB)
            .with_max_sys_ram_spillover(4 * GIB)
            .with_max_response_time(120.0)
            .with_min_gpu_percent(90.0)
            .with_min_context_fill(0.99)
    }

    #[test]
    fn test_healthy_trial_continues() {
        assert_eq!(evaluate(&healthy(4096), &strict()), Decision::Continue);
        assert!(violations(&healthy(4096), &strict()).is_empty());
    }

    #[test]
    fn test_unset_criteria_never_fire() {
        let mut result = healthy(4096);
        result.eval_speed_tps = Some(0.1);
        result.response_time_seconds = Some(10_000.0);
        result.peak_gpu_percent = Some(1.0);
        result.peak_vram_bytes = Some(1000 * GIB);
        assert_eq!(evaluate(&result, &StopCriteria::new()), Decision::Continue);
    }

    #[test]
    fn test_failure_takes_precedence() {
        let failed = TrialResult::failed(
            TrialConfig::new("llama3", 8192, 100),
            TrialFailure::new(FailureKind::Timeout, "request timed out"),
        );
        let decision = evaluate(&failed, &strict());
        assert_eq!(decision.reason(), Some(StopReason::TrialFailed(FailureKind::Timeout)));
        assert_eq!(StopReason::TrialFailed(FailureKind::Timeout).name(), "trial failed");
    }

    #[test]
    fn test_failed_trial_without_criteria_still_stops() {
        let failed = TrialResult::failed(
            TrialConfig::new("llama3", 8192, 100),
            TrialFailure::new(FailureKind::Connection, "connection refused"),
        );
        assert!(evaluate(&failed, &StopCriteria::new()).is_stop());
    }

    #[test]
    fn test_precedence_vram_before_speed() {
        let mut result = healthy(8192);
        result.peak_vram_bytes = Some(22 * GIB);
        result.eval_speed_tps = Some(1.0);
        assert_eq!(
            violations(&result, &strict()),
            vec![Criterion::VramBudget, Criterion::GenerationSpeed]
        );
        assert_eq!(evaluate(&result, &strict()).reason(), Some(StopReason::VramBudget));
    }

    #[test]
    fn test_free_vram_reserve() {
        // 24 GiB card, 21 GiB used, 4 GiB must stay free
        let mut result = healthy(8192);
        result.peak_vram_bytes = Some(21 * GIB);
        let criteria = StopCriteria::new()
            .with_min_free_vram(4 * GIB)
            .with_min_generation_speed(5.0)
            .with_max_response_time(120.0);
        let decision = evaluate(&result, &criteria);
        assert_eq!(decision.reason(), Some(StopReason::VramBudget));
        assert_eq!(decision.reason().unwrap().name(), "vram-budget");

        result.vram_total_bytes = None;
        assert_eq!(evaluate(&result, &criteria), Decision::Continue);
    }

    #[test]
    fn test_vram_falls_back_to_log_record() {
        let mut result = healthy(8192);
        result.peak_vram_bytes = None;
        let criteria = StopCriteria::new().with_max_vram(4 * GIB);
        assert_eq!(evaluate(&result, &criteria), Decision::Continue);

        result.log_record = Some(LogRecord::new("llama3").with_memory(8 * GIB, 6 * GIB));
        assert_eq!(evaluate(&result, &criteria).reason(), Some(StopReason::VramBudget));
    }

    #[test]
    fn test_spillover_sources() {
        let criteria = StopCriteria::new().with_max_sys_ram_spillover(2 * GIB);

        let mut result = healthy(8192);
        result.peak_sys_ram_bytes = Some(16 * GIB);
        assert_eq!(
            evaluate(&result, &criteria).reason(),
            Some(StopReason::SysRamSpillover)
        );

        // The log split wins over RAM growth
        result.log_record = Some(LogRecord::new("llama3").with_memory(8 * GIB, 7 * GIB));
        assert_eq!(evaluate(&result, &criteria), Decision::Continue);

        result.log_record = None;
        result.baseline_sys_ram_bytes = None;
        assert_eq!(evaluate(&result, &criteria), Decision::Continue);
    }

    #[test]
    fn test_gpu_threshold_zero_disables() {
        let mut result = healthy(4096);
        result.peak_gpu_percent = Some(5.0);
        let criteria = StopCriteria::new().with_min_gpu_percent(0.0);
        assert_eq!(evaluate(&result, &criteria), Decision::Continue);

        let criteria = StopCriteria::new().with_min_gpu_percent(50.0);
        assert_eq!(evaluate(&result, &criteria).reason(), Some(StopReason::GpuBelowMinimum));
    }

    #[test]
    fn test_gpu_falls_back_to_split_ratio() {
        let mut result = healthy(4096);
        result.peak_gpu_percent = None;
        result.log_record = Some(LogRecord::new("llama3").with_memory(10 * GIB, 6 * GIB));
        let criteria = StopCriteria::new().with_min_gpu_percent(90.0);
        assert_eq!(evaluate(&result, &criteria).reason(), Some(StopReason::GpuBelowMinimum));
    }

    #[test]
    fn test_context_truncation() {
        let mut result = healthy(8192);
        result.actual_context_size = Some(4096);
        assert_eq!(
            evaluate(&result, &strict()).reason(),
            Some(StopReason::ContextTruncated)
        );

        result.actual_context_size = Some(8150);
        assert_eq!(evaluate(&result, &strict()), Decision::Continue);
    }

    #[test]
    fn test_response_time() {
        let mut result = healthy(4096);
        result.response_time_seconds = Some(121.0);
        assert_eq!(
            evaluate(&result, &strict()).reason(),
            Some(StopReason::ResponseTimeExceeded)
        );
    }

    fn arb_gib() -> impl Strategy<Value = Option<u64>> {
        proptest::option::of((0u64..64).prop_map(|g| g * GIB))
    }

    prop_compose! {
        fn arb_result()(
            target in 1u32..65536,
            actual in proptest::option::of(0u32..65536),
            speed in proptest::option::of(0.0f64..100.0),
            time in proptest::option::of(0.0f64..600.0),
            gpu in proptest::option::of(0.0f64..100.0),
            vram in arb_gib(),
            total in arb_gib(),
            ram in arb_gib(),
            baseline in arb_gib(),
            log in proptest::option::of((0u64..32, 0u64..32)),
            failed in proptest::option::of(400u16..600),
        ) -> TrialResult {
            let config = TrialConfig::new("model", target, 100);
            match failed {
                Some(status) => TrialResult::failed(
                    config,
                    TrialFailure::new(FailureKind::ServerError(status), "boom"),
                ),
                None => {
                    let mut r = TrialResult::new(config);
                    r.actual_context_size = actual;
                    r.eval_speed_tps = speed;
                    r.response_time_seconds = time;
                    r.peak_gpu_percent = gpu;
                    r.peak_vram_bytes = vram;
                    r.vram_total_bytes = total;
                    r.peak_sys_ram_bytes = ram;
                    r.baseline_sys_ram_bytes = baseline;
                    r.log_record = log.map(|(t, v)| {
                        LogRecord::new("model").with_memory(t.max(v) * GIB, v * GIB)
                    });
                    r
                }
            }
        }
    }

    prop_compose! {
        fn arb_criteria()(
            speed in proptest::option::of(0.0f64..50.0),
            vram in arb_gib(),
            free in arb_gib(),
            spill in arb_gib(),
            time in proptest::option::of(0.0f64..300.0),
            gpu in proptest::option::of(0.0f64..100.0),
            fill in proptest::option::of(0.0f64..1.0),
        ) -> StopCriteria {
            StopCriteria {
                min_generation_speed_tps: speed,
                max_vram_budget_bytes: vram,
                min_free_vram_bytes: free,
                max_sys_ram_spillover_bytes: spill,
                max_response_time_seconds: time,
                min_gpu_percent: gpu,
                min_context_fill: fill,
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_evaluation_is_deterministic(result in arb_result(), criteria in arb_criteria()) {
            prop_assert_eq!(evaluate(&result, &criteria), evaluate(&result, &criteria));
        }

        #[test]
        fn prop_first_violation_is_reported(result in arb_result(), criteria in arb_criteria()) {
            let found = violations(&result, &criteria);
            let decision = evaluate(&result, &criteria);
            match found.first() {
                None => prop_assert_eq!(decision, Decision::Continue),
                Some(first) => {
                    let expected = check(*first, &result, &criteria);
                    prop_assert_eq!(Some(decision), expected);
                }
            }
        }

        #[test]
        fn prop_later_limits_do_not_change_earlier_reason(
            result in arb_result(),
            criteria in arb_criteria(),
        ) {
            let decision = evaluate(&result, &criteria);
            if matches!(decision.reason(), Some(StopReason::TrialFailed(_)) | Some(StopReason::VramBudget)) {
                // Tightening lower-precedence limits cannot displace the reason
                let tightened = StopCriteria {
                    min_generation_speed_tps: Some(1e9),
                    max_response_time_seconds: Some(0.0),
                    min_gpu_percent: Some(100.0),
                    min_context_fill: Some(1.0),
                    ..criteria
                };
                prop_assert_eq!(evaluate(&result, &tightened).reason(), decision.reason());
            }
        }

        #[test]
        fn prop_missing_memory_data_never_fires_vram(
            mut result in arb_result(),
            criteria in arb_criteria(),
        ) {
            result.log_record = None;
            result.peak_vram_bytes = None;
            prop_assert_ne!(evaluate(&result, &criteria).reason(), Some(StopReason::VramBudget));
        }

        #[test]
        fn prop_failed_trials_always_stop(result in arb_result(), criteria in arb_criteria()) {
            if result.is_failed() {
                prop_assert!(matches!(
                    evaluate(&result, &criteria).reason(),
                    Some(StopReason::TrialFailed(_))
                ));
            }
        }
    }
}
