use std::f64::consts::PI;

use super::financial::{decumulation_months, gross_withdrawal, monthly_from_annual};
use super::types::PlanParameters;

/// Everything a single trial needs, resolved once per batch so the inner loop only
/// does arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathModel {
    pub months_accum: u32,
    pub months_retirement: u32,
    pub mu_monthly: f64,
    pub sigma_monthly: f64,
    pub start_balance: f64,
    pub gross_monthly_withdrawal: f64,
    pub contribute_at_end: bool,
}

impl PathModel {
    pub fn new(params: &PlanParameters, real_annual_mean: f64, real_annual_vol: f64) -> Self {
        Self {
            months_accum: params.years_to_retirement().saturating_mul(12),
            months_retirement: decumulation_months(params.simulated_decumulation_years()),
            mu_monthly: monthly_from_annual(real_annual_mean),
            sigma_monthly: real_annual_vol / 12.0_f64.sqrt(),
            start_balance: params.current_assets,
            gross_monthly_withdrawal: gross_withdrawal(
                params.target_monthly_withdrawal_today,
                params.tax_rate_on_withdrawals,
            ),
            contribute_at_end: params.contribute_at_end,
        }
    }

    fn sample_return(&self, rng: &mut Rng) -> f64 {
        self.mu_monthly + self.sigma_monthly * rng.standard_normal()
    }

    /// Balance at retirement, or `None` if it stopped being finite on the way.
    pub(crate) fn accumulate(&self, monthly_contribution: f64, rng: &mut Rng) -> Option<f64> {
        let mut balance = self.start_balance;
        for _ in 0..self.months_accum {
            let r = self.sample_return(rng);
            balance = if self.contribute_at_end {
                balance * (1.0 + r) + monthly_contribution
            } else {
                (balance + monthly_contribution) * (1.0 + r)
            };
            if !balance.is_finite() {
                return None;
            }
        }
        Some(balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Survived,
    /// Withdrawals exhausted the balance during retirement month `month` (0-based).
    Depleted { month: u32 },
    /// The balance overflowed; counted as a failure.
    Overflow,
}

impl TrialOutcome {
    pub fn survived(self) -> bool {
        matches!(self, TrialOutcome::Survived)
    }
}

pub fn simulate_path(model: &PathModel, monthly_contribution: f64, rng: &mut Rng) -> TrialOutcome {
    let Some(mut balance) = model.accumulate(monthly_contribution, rng) else {
        return TrialOutcome::Overflow;
    };

    for month in 0..model.months_retirement {
        balance -= model.gross_monthly_withdrawal;
        if balance <= 0.0 {
            return TrialOutcome::Depleted { month };
        }
        balance *= 1.0 + model.sample_return(rng);
        if !balance.is_finite() {
            return TrialOutcome::Overflow;
        }
    }

    if balance > 0.0 {
        TrialOutcome::Survived
    } else {
        TrialOutcome::Depleted {
            month: model.months_retirement.saturating_sub(1),
        }
    }
}

/// Fraction of `trials` independent paths that survive. Trial `i` of a batch draws from
/// its own stream seeded from `(batch_seed, i)`, so a batch is reproducible and trials
/// share no state.
pub fn estimate_success_rate(
    model: &PathModel,
    monthly_contribution: f64,
    trials: u32,
    batch_seed: u64,
) -> f64 {
    if trials == 0 {
        return 0.0;
    }

    let mut successes = 0_u32;
    for trial_id in 0..trials {
        let mut rng = Rng::new(derive_seed(batch_seed, trial_id));
        if simulate_path(model, monthly_contribution, &mut rng).survived() {
            successes += 1;
        }
    }
    successes as f64 / trials as f64
}

/// Seed of the `batch`-th evaluation derived from a plan's base seed.
pub fn batch_seed(base_seed: u64, batch: u32) -> u64 {
    splitmix64(base_seed ^ ((batch as u64) << 32))
}

fn derive_seed(batch_seed: u64, trial_id: u32) -> u64 {
    splitmix64(batch_seed ^ trial_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// xorshift64* generator.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform on the open interval (0, 1).
    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    /// One Box–Muller draw from two fresh uniforms.
    pub fn standard_normal(&mut self) -> f64 {
        let u1 = self.next_f64();
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}
