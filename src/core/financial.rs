//! Closed-form time-value-of-money helpers.
//!
//! Every rate is a decimal fraction (0.06 for 6%) and every period count is in months
//! unless the name says otherwise.

use super::error::{PlanError, PlanResult};

/// Rates with a smaller magnitude are treated as exactly zero by the annuity formulas.
pub const ZERO_RATE_EPS: f64 = 1e-12;

/// Applies the annual fee, then taxes only a positive remainder.
pub fn net_nominal_after_fees_taxes(gross_nominal: f64, fee: f64, tax_on_gains: f64) -> f64 {
    let net_before_tax = gross_nominal - fee;
    if net_before_tax <= 0.0 {
        return net_before_tax;
    }
    net_before_tax * (1.0 - tax_on_gains)
}

/// Exact Fisher relation.
pub fn real_return(nominal: f64, inflation: f64) -> f64 {
    (1.0 + nominal) / (1.0 + inflation) - 1.0
}

pub fn monthly_from_annual(r_annual: f64) -> f64 {
    (1.0 + r_annual).powf(1.0 / 12.0) - 1.0
}

pub fn fv_lump_sum(pv: f64, r_monthly: f64, n_months: u32) -> f64 {
    pv * (1.0 + r_monthly).powf(n_months as f64)
}

pub fn fv_annuity(pmt: f64, r_monthly: f64, n_months: u32, pay_at_end: bool) -> f64 {
    if n_months == 0 {
        return 0.0;
    }
    if r_monthly.abs() < ZERO_RATE_EPS {
        return pmt * n_months as f64;
    }

    let fv = pmt * (((1.0 + r_monthly).powf(n_months as f64) - 1.0) / r_monthly);
    if pay_at_end { fv } else { fv * (1.0 + r_monthly) }
}

/// Gross withdrawal needed so that `net` remains after the withdrawal tax.
pub fn gross_withdrawal(net: f64, tax_on_withdrawals: f64) -> f64 {
    net / (1.0 - tax_on_withdrawals)
}

pub fn required_capital_withdrawal_rate(
    desired_net_monthly_today: f64,
    max_annual_withdrawal_rate: f64,
    tax_on_withdrawals: f64,
) -> PlanResult<f64> {
    if max_annual_withdrawal_rate <= 0.0 {
        return Err(PlanError::invalid(
            "max_annual_withdrawal_rate",
            "must be > 0",
        ));
    }

    let gross_annual = gross_withdrawal(desired_net_monthly_today * 12.0, tax_on_withdrawals);
    Ok(gross_annual / max_annual_withdrawal_rate)
}

/// Present value of `retirement_months` grossed-up withdrawals discounted at the real
/// retirement-phase rate.
pub fn required_capital_amortization(
    desired_net_monthly_today: f64,
    tax_on_withdrawals: f64,
    r_monthly_retirement: f64,
    retirement_months: u32,
    pay_at_start: bool,
) -> f64 {
    if retirement_months == 0 {
        return 0.0;
    }

    let gross_monthly = gross_withdrawal(desired_net_monthly_today, tax_on_withdrawals);
    if r_monthly_retirement.abs() < ZERO_RATE_EPS {
        return gross_monthly * retirement_months as f64;
    }

    let discount = (1.0 + r_monthly_retirement).powf(-(retirement_months as f64));
    let pv_ordinary = gross_monthly * (1.0 - discount) / r_monthly_retirement;
    if pay_at_start {
        pv_ordinary * (1.0 + r_monthly_retirement)
    } else {
        pv_ordinary
    }
}

pub fn real_to_nominal_at_retirement(real_amount: f64, annual_inflation: f64, years: u32) -> f64 {
    real_amount * (1.0 + annual_inflation).powf(years as f64)
}

/// Month count of a decumulation horizon given in (possibly fractional) years; never
/// shorter than one month.
pub fn decumulation_months(years: f64) -> u32 {
    let months = (years * 12.0).round();
    if months.is_finite() && months >= 1.0 {
        months as u32
    } else {
        1
    }
}
