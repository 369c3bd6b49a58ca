mod engine;
mod error;
mod financial;
mod projection;
mod solver;
mod types;

pub use engine::{PathModel, Rng, TrialOutcome, batch_seed, estimate_success_rate, simulate_path};
pub use error::{PlanError, PlanResult};
pub use financial::{
    decumulation_months, fv_annuity, fv_lump_sum, gross_withdrawal, monthly_from_annual,
    net_nominal_after_fees_taxes, real_return, real_to_nominal_at_retirement,
    required_capital_amortization, required_capital_withdrawal_rate,
};
pub use projection::{ASSETS_SUFFICE_NOTE, compute_deterministic, compute_scenarios};
pub use solver::{
    ContributionSolveConfig, MAX_ITERATIONS, MAX_SIMULATED_YEARS, MAX_TRIALS, MIN_TRIALS, TOLERANCE,
    compute_monte_carlo, run_monte_carlo, solve_contribution,
};
pub use types::{
    DeterministicResult, MonteCarloResult, MonteCarloRun, PlanParameters, RetirementModel,
    ScenarioDeltas, ScenarioSet, SolveIteration,
};
