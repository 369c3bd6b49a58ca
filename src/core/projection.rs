use tracing::debug;

use super::error::{PlanError, PlanResult};
use super::financial::{
    ZERO_RATE_EPS, decumulation_months, fv_lump_sum, monthly_from_annual,
    net_nominal_after_fees_taxes, real_return, real_to_nominal_at_retirement,
    required_capital_amortization, required_capital_withdrawal_rate,
};
use super::types::{
    DeterministicResult, PlanParameters, RetirementModel, ScenarioDeltas, ScenarioSet,
};

pub const ASSETS_SUFFICE_NOTE: &str =
    "Under these assumptions, your current assets already meet the target.";

const ILLUSTRATION_YEARS: [u32; 3] = [1, 5, 10];

/// Closed-form projection under a fixed (return, inflation) pair. The pair is passed
/// separately from `params` so callers can evaluate shifted scenarios.
pub fn compute_deterministic(
    params: &PlanParameters,
    nominal_annual_return: f64,
    annual_inflation: f64,
) -> PlanResult<DeterministicResult> {
    if params.retirement_age <= params.current_age {
        return Err(PlanError::invalid(
            "retirement_age",
            "must be greater than current_age",
        ));
    }

    let years = params.years_to_retirement();
    let months = years
        .checked_mul(12)
        .ok_or_else(|| PlanError::invalid("retirement_age", "accumulation period is too long"))?;

    let nominal_net = net_nominal_after_fees_taxes(
        nominal_annual_return,
        params.annual_fee,
        params.tax_rate_on_gains,
    );
    let real_annual = real_return(nominal_net, annual_inflation);
    let real_monthly = monthly_from_annual(real_annual);

    let target_capital = target_capital_real(params, real_monthly)?;
    let fv_current = fv_lump_sum(params.current_assets, real_monthly, months);
    let needed_from_contrib = (target_capital - fv_current).max(0.0);

    let target_capital_nominal =
        real_to_nominal_at_retirement(target_capital, annual_inflation, years);
    let fv_current_nominal = real_to_nominal_at_retirement(fv_current, annual_inflation, years);

    let mut result = DeterministicResult {
        years_to_retirement: years,
        real_return_annual_accum: real_annual,
        real_return_monthly_accum: real_monthly,
        target_capital_real: target_capital,
        target_capital_nominal,
        fv_current_assets_real: fv_current,
        fv_current_assets_nominal: fv_current_nominal,
        required_from_contributions_real: 0.0,
        required_monthly_contribution_real: 0.0,
        required_monthly_contribution_nominal_year1: 0.0,
        required_monthly_contribution_nominal_year5: 0.0,
        required_monthly_contribution_nominal_year10: 0.0,
        note: None,
    };

    if needed_from_contrib <= 0.0 {
        result.note = Some(ASSETS_SUFFICE_NOTE.to_string());
        return Ok(result);
    }

    let monthly_contrib = level_contribution(
        needed_from_contrib,
        real_monthly,
        months,
        params.contribute_at_end,
    );
    let [year1, year5, year10] = ILLUSTRATION_YEARS
        .map(|year| nominal_contribution_in_year(monthly_contrib, annual_inflation, year, years));

    result.required_from_contributions_real = needed_from_contrib;
    result.required_monthly_contribution_real = monthly_contrib;
    result.required_monthly_contribution_nominal_year1 = year1;
    result.required_monthly_contribution_nominal_year5 = year5;
    result.required_monthly_contribution_nominal_year10 = year10;

    debug!(
        years,
        target_capital,
        fv_current,
        monthly_contrib,
        "deterministic projection"
    );
    Ok(result)
}

/// Base, optimistic and pessimistic projections. Optimistic inflation is floored at zero
/// and the pessimistic return at -99%.
pub fn compute_scenarios(
    params: &PlanParameters,
    deltas: ScenarioDeltas,
) -> PlanResult<ScenarioSet> {
    let base =
        compute_deterministic(params, params.nominal_annual_return, params.annual_inflation)?;
    let optimistic = compute_deterministic(
        params,
        params.nominal_annual_return + deltas.optimistic_return_delta,
        (params.annual_inflation + deltas.optimistic_inflation_delta).max(0.0),
    )?;
    let pessimistic = compute_deterministic(
        params,
        (params.nominal_annual_return + deltas.pessimistic_return_delta).max(-0.99),
        params.annual_inflation + deltas.pessimistic_inflation_delta,
    )?;

    Ok(ScenarioSet {
        base,
        optimistic,
        pessimistic,
    })
}

fn target_capital_real(params: &PlanParameters, real_monthly: f64) -> PlanResult<f64> {
    match params.retirement_model {
        RetirementModel::WithdrawalRate => required_capital_withdrawal_rate(
            params.target_monthly_withdrawal_today,
            params.max_annual_withdrawal_rate,
            params.tax_rate_on_withdrawals,
        ),
        RetirementModel::Amortization => Ok(required_capital_amortization(
            params.target_monthly_withdrawal_today,
            params.tax_rate_on_withdrawals,
            real_monthly,
            decumulation_months(params.retirement_horizon_years),
            true,
        )),
    }
}

/// Inverts the annuity future value: the level payment that accumulates to `gap`.
fn level_contribution(gap: f64, r_monthly: f64, months: u32, contribute_at_end: bool) -> f64 {
    if r_monthly.abs() < ZERO_RATE_EPS {
        return gap / months as f64;
    }

    let mut factor = ((1.0 + r_monthly).powf(months as f64) - 1.0) / r_monthly;
    if !contribute_at_end {
        factor *= 1.0 + r_monthly;
    }
    gap / factor
}

/// Nominal size of the level real contribution during `year` (1-based), or 0 once
/// contributions have stopped.
fn nominal_contribution_in_year(
    real_contribution: f64,
    annual_inflation: f64,
    year: u32,
    years_to_retirement: u32,
) -> f64 {
    if year > years_to_retirement {
        return 0.0;
    }
    real_to_nominal_at_retirement(real_contribution, annual_inflation, year - 1)
}
