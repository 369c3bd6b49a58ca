use tracing::{debug, info};

use super::engine::{PathModel, batch_seed, estimate_success_rate};
use super::error::{PlanError, PlanResult};
use super::financial::{net_nominal_after_fees_taxes, real_return};
use super::projection::compute_deterministic;
use super::types::{MonteCarloResult, MonteCarloRun, PlanParameters, SolveIteration};

pub const MIN_TRIALS: u32 = 200;
pub const MAX_TRIALS: u32 = 20_000;
pub const MAX_ITERATIONS: u32 = 20;
pub const TOLERANCE: f64 = 0.01;
/// Longest retirement the simulator walks month by month.
pub const MAX_SIMULATED_YEARS: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContributionSolveConfig {
    pub target_success_probability: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub trials: u32,
    pub base_seed: u64,
}

impl ContributionSolveConfig {
    /// Bounds bracket the root generously around the deterministic estimate.
    pub fn for_plan(params: &PlanParameters, deterministic_contribution: f64) -> Self {
        Self {
            target_success_probability: params.target_success_probability,
            search_min: 0.0,
            search_max: (deterministic_contribution * 3.0 + 100_000.0).max(10_000.0),
            tolerance: TOLERANCE,
            max_iterations: MAX_ITERATIONS,
            trials: params.trials.clamp(MIN_TRIALS, MAX_TRIALS),
            base_seed: params.seed,
        }
    }
}

/// Monte Carlo mode: solve the contribution reaching the plan's target success
/// probability with returns drawn around the friction-adjusted real mean.
pub fn compute_monte_carlo(
    params: &PlanParameters,
    annual_inflation: f64,
) -> PlanResult<MonteCarloResult> {
    let deterministic =
        compute_deterministic(params, params.nominal_annual_return, annual_inflation)?;

    let simulated_years = params.simulated_decumulation_years();
    if simulated_years.is_nan() || simulated_years > MAX_SIMULATED_YEARS {
        let field = if params.decumulation_years.is_some() {
            "decumulation_years"
        } else {
            "retirement_horizon_years"
        };
        return Err(PlanError::invalid(
            field,
            format!("must be at most {MAX_SIMULATED_YEARS} years"),
        ));
    }

    let nominal_net = net_nominal_after_fees_taxes(
        params.nominal_annual_return,
        params.annual_fee,
        params.tax_rate_on_gains,
    );
    let real_annual_mean = real_return(nominal_net, annual_inflation);
    let model = PathModel::new(params, real_annual_mean, params.annual_volatility);
    let config =
        ContributionSolveConfig::for_plan(params, deterministic.required_monthly_contribution_real);

    Ok(solve_contribution(&model, config))
}

/// Runs the Monte Carlo mode at the plan's own inflation and keeps the parameter snapshot
/// so callers can tell when the result goes stale.
pub fn run_monte_carlo(params: &PlanParameters) -> PlanResult<MonteCarloRun> {
    let result = compute_monte_carlo(params, params.annual_inflation)?;
    Ok(MonteCarloRun {
        parameters: params.clone(),
        result,
    })
}

/// Bisection for the smallest contribution whose estimated success rate meets the
/// target. Every evaluation uses a fresh batch of trials.
pub fn solve_contribution(model: &PathModel, config: ContributionSolveConfig) -> MonteCarloResult {
    let target = config.target_success_probability;
    let mut batch = 0_u32;
    let mut evaluate = |candidate: f64| {
        let seed = batch_seed(config.base_seed, batch);
        batch += 1;
        estimate_success_rate(model, candidate, config.trials, seed)
    };

    let mut history = Vec::with_capacity(config.max_iterations as usize);
    let mut lo = config.search_min;
    let mut hi = config.search_max;
    let mut best = hi;
    let mut feasible = false;
    let mut converged = false;

    if evaluate(lo) >= target {
        best = lo;
        feasible = true;
        converged = true;
    } else {
        for iteration in 1..=config.max_iterations {
            let mid = (lo + hi) * 0.5;
            let success_rate = evaluate(mid);
            history.push(SolveIteration {
                iteration,
                lower_bound: lo,
                upper_bound: hi,
                candidate: mid,
                success_rate,
                success_ci_half_width: binomial_ci_half_width(success_rate, config.trials),
            });
            debug!(iteration, lo, hi, mid, success_rate, "bisection step");

            if success_rate >= target {
                best = mid;
                hi = mid;
                feasible = true;
            } else {
                lo = mid;
            }

            if hi - lo < config.tolerance {
                converged = true;
                break;
            }
        }
    }

    let success_probability = evaluate(best);
    let iterations = history.len() as u32;
    info!(
        contribution = best,
        success_probability,
        trials = config.trials,
        iterations,
        converged,
        feasible,
        "solved required contribution"
    );

    MonteCarloResult {
        required_monthly_contribution_real: best,
        success_probability,
        success_ci_half_width: binomial_ci_half_width(success_probability, config.trials),
        trials: config.trials,
        iterations,
        converged,
        feasible,
        history,
    }
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RetirementModel;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn short_plan() -> PlanParameters {
        PlanParameters {
            current_age: 55,
            retirement_age: 65,
            nominal_annual_return: 0.06,
            annual_inflation: 0.025,
            annual_fee: 0.006,
            tax_rate_on_gains: 0.15,
            tax_rate_on_withdrawals: 0.10,
            target_monthly_withdrawal_today: 20_000.0,
            retirement_model: RetirementModel::Amortization,
            max_annual_withdrawal_rate: 0.04,
            retirement_horizon_years: 20.0,
            decumulation_years: None,
            current_assets: 0.0,
            contribute_at_end: true,
            annual_volatility: 0.0,
            trials: 200,
            target_success_probability: 0.8,
            seed: 42,
        }
    }

    fn deterministic_contribution(params: &PlanParameters) -> f64 {
        compute_deterministic(params, params.nominal_annual_return, params.annual_inflation)
            .expect("valid plan")
            .required_monthly_contribution_real
    }

    #[test]
    fn config_clamps_trials_and_brackets_the_deterministic_estimate() {
        let mut params = short_plan();
        params.trials = 50;
        let config = ContributionSolveConfig::for_plan(&params, 40_000.0);
        assert_eq!(config.trials, MIN_TRIALS);
        assert_close(config.search_max, 220_000.0, 1e-9);
        assert_eq!(config.search_min, 0.0);
        assert_eq!(config.max_iterations, 20);

        params.trials = 1_000_000;
        let config = ContributionSolveConfig::for_plan(&params, 0.0);
        assert_eq!(config.trials, MAX_TRIALS);
        assert_close(config.search_max, 100_000.0, 1e-9);
    }

    #[test]
    fn zero_volatility_solver_recovers_deterministic_contribution() {
        let params = short_plan();
        let required = deterministic_contribution(&params);
        let result = compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");

        assert!(result.feasible);
        assert_close(result.required_monthly_contribution_real, required, 1.0);
        assert_eq!(result.success_probability, 1.0);
        assert_eq!(result.success_ci_half_width, 0.0);
        assert_eq!(result.trials, MIN_TRIALS);
        // A 20-step halving of a >= 100k bracket never gets below one cent.
        assert_eq!(result.iterations, MAX_ITERATIONS);
        assert!(!result.converged);
    }

    #[test]
    fn bisection_history_narrows_monotonically() {
        let params = short_plan();
        let result = compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");

        assert_eq!(result.history.len(), result.iterations as usize);
        for pair in result.history.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            assert!(next.lower_bound >= prev.lower_bound);
            assert!(next.upper_bound <= prev.upper_bound);
            assert_close(
                next.upper_bound - next.lower_bound,
                (prev.upper_bound - prev.lower_bound) * 0.5,
                1e-6,
            );
        }
        for step in &result.history {
            assert_close(step.candidate, (step.lower_bound + step.upper_bound) * 0.5, 1e-9);
            assert!((0.0..=1.0).contains(&step.success_rate));
        }
    }

    #[test]
    fn narrow_bracket_stops_early_once_tolerance_is_met() {
        let params = short_plan();
        let model = PathModel::new(&params, 0.02, 0.0);
        let config = ContributionSolveConfig {
            search_max: 5.0,
            ..ContributionSolveConfig::for_plan(&params, 0.0)
        };
        let result = solve_contribution(&model, config);

        assert!(result.converged);
        assert!(result.iterations < MAX_ITERATIONS);
        let last = result.history.last().expect("at least one step");
        let width = if last.success_rate >= config.target_success_probability {
            last.candidate - last.lower_bound
        } else {
            last.upper_bound - last.candidate
        };
        assert!(width < TOLERANCE);
    }

    #[test]
    fn unreachable_target_reports_upper_bound_as_infeasible() {
        let params = short_plan();
        let real_mean = real_return(
            net_nominal_after_fees_taxes(0.06, 0.006, 0.15),
            params.annual_inflation,
        );
        let model = PathModel::new(&params, real_mean, 0.0);
        let config = ContributionSolveConfig {
            search_max: 10.0,
            ..ContributionSolveConfig::for_plan(&params, 0.0)
        };
        let result = solve_contribution(&model, config);

        assert!(!result.feasible);
        assert_eq!(result.required_monthly_contribution_real, 10.0);
        assert_eq!(result.success_probability, 0.0);
    }

    #[test]
    fn sufficient_assets_need_exactly_zero_contribution() {
        let mut params = short_plan();
        params.current_assets = 100_000_000.0;
        params.annual_volatility = 0.1;
        let result = compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");

        assert_eq!(result.required_monthly_contribution_real, 0.0);
        assert_eq!(result.iterations, 0);
        assert!(result.history.is_empty());
        assert!(result.feasible);
        assert_eq!(result.success_probability, 1.0);
    }

    #[test]
    fn invalid_configuration_fails_before_simulating() {
        let mut params = short_plan();
        params.retirement_age = 30;
        params.current_age = 35;
        assert!(matches!(
            compute_monte_carlo(&params, params.annual_inflation),
            Err(PlanError::InvalidConfiguration { field: "retirement_age", .. })
        ));

        let mut params = short_plan();
        params.retirement_model = RetirementModel::WithdrawalRate;
        params.max_annual_withdrawal_rate = 0.0;
        let err = run_monte_carlo(&params).expect_err("must reject");
        assert_eq!(err.field(), "max_annual_withdrawal_rate");
    }

    #[test]
    fn oversized_retirement_horizon_is_rejected_before_simulating() {
        let mut params = short_plan();
        params.target_monthly_withdrawal_today = 0.0;
        params.decumulation_years = Some(1e9);
        let err = compute_monte_carlo(&params, params.annual_inflation)
            .expect_err("horizon too long to simulate");
        assert_eq!(err.field(), "decumulation_years");

        let mut params = short_plan();
        params.retirement_horizon_years = 1e9;
        let err = run_monte_carlo(&params).expect_err("horizon too long to simulate");
        assert_eq!(err.field(), "retirement_horizon_years");
    }

    #[test]
    fn same_seed_reproduces_the_whole_search() {
        let mut params = short_plan();
        params.annual_volatility = 0.15;
        let a = compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");
        let b = compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");
        assert_eq!(a, b);
    }

    #[test]
    fn stochastic_solver_lands_near_target_probability() {
        let mut params = short_plan();
        params.current_age = 60;
        params.retirement_horizon_years = 15.0;
        params.annual_volatility = 0.15;
        params.trials = 4_000;

        let runs = 10;
        let mut within = 0;
        for seed in 0..runs {
            params.seed = 1_000 + seed;
            let result =
                compute_monte_carlo(&params, params.annual_inflation).expect("valid plan");
            assert!(result.feasible);
            assert!(result.required_monthly_contribution_real > 0.0);
            if (result.success_probability - params.target_success_probability).abs() <= 0.03 {
                within += 1;
            }
        }
        assert!(within * 10 >= runs * 9, "only {within} of {runs} runs within tolerance");
    }

    #[test]
    fn run_snapshot_goes_stale_when_any_input_changes() {
        let params = short_plan();
        let run = run_monte_carlo(&params).expect("valid plan");
        assert!(!run.is_stale_for(&params));

        let mut edited = params.clone();
        edited.annual_fee = 0.007;
        assert!(run.is_stale_for(&edited));

        let mut reseeded = params.clone();
        reseeded.seed = 43;
        assert!(run.is_stale_for(&reseeded));
    }
}
