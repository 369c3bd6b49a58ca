use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetirementModel {
    WithdrawalRate,
    Amortization,
}

/// Immutable snapshot of everything a calculation needs. Rates are decimal fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanParameters {
    pub current_age: u32,
    pub retirement_age: u32,
    pub nominal_annual_return: f64,
    pub annual_inflation: f64,
    pub annual_fee: f64,
    pub tax_rate_on_gains: f64,
    pub tax_rate_on_withdrawals: f64,
    pub target_monthly_withdrawal_today: f64,
    pub retirement_model: RetirementModel,
    pub max_annual_withdrawal_rate: f64,
    pub retirement_horizon_years: f64,
    /// Horizon simulated after retirement. `None` reuses `retirement_horizon_years`.
    pub decumulation_years: Option<f64>,
    pub current_assets: f64,
    pub contribute_at_end: bool,
    pub annual_volatility: f64,
    pub trials: u32,
    pub target_success_probability: f64,
    pub seed: u64,
}

impl PlanParameters {
    pub fn years_to_retirement(&self) -> u32 {
        self.retirement_age.saturating_sub(self.current_age)
    }

    pub fn simulated_decumulation_years(&self) -> f64 {
        self.decumulation_years.unwrap_or(self.retirement_horizon_years)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicResult {
    pub years_to_retirement: u32,
    pub real_return_annual_accum: f64,
    pub real_return_monthly_accum: f64,
    pub target_capital_real: f64,
    pub target_capital_nominal: f64,
    pub fv_current_assets_real: f64,
    pub fv_current_assets_nominal: f64,
    pub required_from_contributions_real: f64,
    pub required_monthly_contribution_real: f64,
    pub required_monthly_contribution_nominal_year1: f64,
    pub required_monthly_contribution_nominal_year5: f64,
    pub required_monthly_contribution_nominal_year10: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Additive shifts applied to the base return and inflation for the side scenarios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioDeltas {
    pub optimistic_return_delta: f64,
    pub optimistic_inflation_delta: f64,
    pub pessimistic_return_delta: f64,
    pub pessimistic_inflation_delta: f64,
}

impl Default for ScenarioDeltas {
    fn default() -> Self {
        Self {
            optimistic_return_delta: 0.02,
            optimistic_inflation_delta: -0.01,
            pessimistic_return_delta: -0.02,
            pessimistic_inflation_delta: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSet {
    pub base: DeterministicResult,
    pub optimistic: DeterministicResult,
    pub pessimistic: DeterministicResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub required_monthly_contribution_real: f64,
    pub success_probability: f64,
    pub success_ci_half_width: f64,
    pub trials: u32,
    pub iterations: u32,
    pub converged: bool,
    pub feasible: bool,
    pub history: Vec<SolveIteration>,
}

/// A Monte Carlo result together with the parameters it was computed from.
#[derive(Debug, Clone)]
pub struct MonteCarloRun {
    pub parameters: PlanParameters,
    pub result: MonteCarloResult,
}

impl MonteCarloRun {
    pub fn is_stale_for(&self, current: &PlanParameters) -> bool {
        &self.parameters != current
    }
}
