use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum, error::ErrorKind};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::{
    DeterministicResult, MonteCarloResult, PlanError, PlanParameters, RetirementModel,
    ScenarioDeltas, ScenarioSet, compute_deterministic, compute_monte_carlo, compute_scenarios,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliRetirementModel {
    WithdrawalRate,
    Amortization,
}

impl From<CliRetirementModel> for RetirementModel {
    fn from(value: CliRetirementModel) -> Self {
        match value {
            CliRetirementModel::WithdrawalRate => RetirementModel::WithdrawalRate,
            CliRetirementModel::Amortization => RetirementModel::Amortization,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCalcMode {
    Deterministic,
    MonteCarlo,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRetirementModel {
    #[serde(alias = "WithdrawalRate", alias = "withdrawalRate", alias = "withdrawal_rate")]
    WithdrawalRate,
    #[serde(alias = "Amortization", alias = "amortisation")]
    Amortization,
}

impl From<ApiRetirementModel> for CliRetirementModel {
    fn from(value: ApiRetirementModel) -> Self {
        match value {
            ApiRetirementModel::WithdrawalRate => CliRetirementModel::WithdrawalRate,
            ApiRetirementModel::Amortization => CliRetirementModel::Amortization,
        }
    }
}

/// Web payload. Every field is optional and falls back to the CLI defaults; rates are in
/// percent, like the CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,

    nominal_annual_return: Option<f64>,
    annual_inflation: Option<f64>,
    optimistic_return_delta: Option<f64>,
    optimistic_inflation_delta: Option<f64>,
    pessimistic_return_delta: Option<f64>,
    pessimistic_inflation_delta: Option<f64>,

    annual_fee: Option<f64>,
    tax_rate_on_gains: Option<f64>,
    tax_rate_on_withdrawals: Option<f64>,

    target_monthly_withdrawal_today: Option<f64>,
    #[serde(alias = "retireModel")]
    retirement_model: Option<ApiRetirementModel>,
    max_annual_withdrawal_rate: Option<f64>,
    retirement_horizon_years: Option<f64>,
    decumulation_years: Option<f64>,

    current_assets: Option<f64>,
    contribute_at_end: Option<bool>,

    #[serde(alias = "mcAnnualVolatility")]
    annual_volatility: Option<f64>,
    #[serde(alias = "mcTrials")]
    trials: Option<u32>,
    #[serde(alias = "mcTargetSuccess")]
    target_success: Option<f64>,
    seed: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Required monthly savings for retirement: closed-form projection and Monte Carlo solver"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = CliCalcMode::Deterministic)]
    mode: CliCalcMode,
    #[arg(long, default_value_t = 35)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(
        long,
        default_value_t = 6.0,
        allow_negative_numbers = true,
        help = "Expected nominal annual return in percent, before fees and taxes"
    )]
    nominal_annual_return: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        allow_negative_numbers = true,
        help = "Expected annual inflation in percent"
    )]
    annual_inflation: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        allow_negative_numbers = true,
        help = "Optimistic scenario shift of the nominal return in percentage points"
    )]
    optimistic_return_delta: f64,
    #[arg(
        long,
        default_value_t = -1.0,
        allow_negative_numbers = true,
        help = "Optimistic scenario shift of inflation in percentage points"
    )]
    optimistic_inflation_delta: f64,
    #[arg(
        long,
        default_value_t = -2.0,
        allow_negative_numbers = true,
        help = "Pessimistic scenario shift of the nominal return in percentage points"
    )]
    pessimistic_return_delta: f64,
    #[arg(
        long,
        default_value_t = 1.0,
        allow_negative_numbers = true,
        help = "Pessimistic scenario shift of inflation in percentage points"
    )]
    pessimistic_inflation_delta: f64,
    #[arg(long, default_value_t = 0.6, help = "Annual fund fee in percent")]
    annual_fee: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Tax on positive investment gains in percent"
    )]
    tax_rate_on_gains: f64,
    #[arg(long, default_value_t = 10.0, help = "Tax on withdrawals in percent")]
    tax_rate_on_withdrawals: f64,
    #[arg(
        long,
        default_value_t = 45000.0,
        help = "Desired net monthly income in retirement, in today's money"
    )]
    target_monthly_withdrawal_today: f64,
    #[arg(long, value_enum, default_value_t = CliRetirementModel::WithdrawalRate)]
    retirement_model: CliRetirementModel,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Maximum sustainable annual withdrawal rate in percent (withdrawal-rate model)"
    )]
    max_annual_withdrawal_rate: f64,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Years of retirement to fund (amortization model)"
    )]
    retirement_horizon_years: f64,
    #[arg(
        long,
        help = "Years of retirement to simulate; defaults to --retirement-horizon-years"
    )]
    decumulation_years: Option<f64>,
    #[arg(long, default_value_t = 800000.0)]
    current_assets: f64,
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Contributions land at month end (true) or month start (false)"
    )]
    contribute_at_end: bool,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Annual volatility of real returns in percent"
    )]
    annual_volatility: f64,
    #[arg(
        long,
        default_value_t = 2000,
        help = "Monte Carlo trials per evaluation, clamped to 200..=20000"
    )]
    trials: u32,
    #[arg(
        long,
        default_value_t = 80.0,
        help = "Required Monte Carlo success probability in percent"
    )]
    target_success: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug)]
struct ApiRequest {
    inputs: PlanParameters,
    deltas: ScenarioDeltas,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloResponse {
    target_success_probability: f64,
    annual_volatility: f64,
    deterministic: DeterministicResult,
    monte_carlo: MonteCarloResult,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

const MAX_AGE: u32 = 120;
const MAX_HORIZON_YEARS: f64 = 100.0;

fn build_inputs(cli: &Cli) -> Result<PlanParameters, String> {
    if cli.current_age > MAX_AGE {
        return Err(format!("--current-age must be <= {MAX_AGE}"));
    }

    if cli.retirement_age > MAX_AGE {
        return Err(format!("--retirement-age must be <= {MAX_AGE}"));
    }

    if !cli.current_assets.is_finite() || cli.current_assets < 0.0 {
        return Err("--current-assets must be >= 0".to_string());
    }

    if !cli.target_monthly_withdrawal_today.is_finite() || cli.target_monthly_withdrawal_today < 0.0
    {
        return Err("--target-monthly-withdrawal-today must be >= 0".to_string());
    }

    for (name, rate) in [
        ("--annual-fee", cli.annual_fee),
        ("--tax-rate-on-gains", cli.tax_rate_on_gains),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if !(0.0..100.0).contains(&cli.tax_rate_on_withdrawals) {
        return Err("--tax-rate-on-withdrawals must be >= 0 and < 100".to_string());
    }

    if !cli.nominal_annual_return.is_finite() || cli.nominal_annual_return <= -100.0 {
        return Err("--nominal-annual-return must be > -100".to_string());
    }

    if !cli.annual_inflation.is_finite() || cli.annual_inflation <= -100.0 {
        return Err("--annual-inflation must be > -100".to_string());
    }

    let model: RetirementModel = cli.retirement_model.into();
    match model {
        RetirementModel::WithdrawalRate => {
            if !cli.max_annual_withdrawal_rate.is_finite() || cli.max_annual_withdrawal_rate > 20.0
            {
                return Err("--max-annual-withdrawal-rate must be <= 20".to_string());
            }
        }
        RetirementModel::Amortization => {
            if !cli.retirement_horizon_years.is_finite() || cli.retirement_horizon_years < 1.0 {
                return Err("--retirement-horizon-years must be >= 1".to_string());
            }
        }
    }

    if !cli.retirement_horizon_years.is_finite() || cli.retirement_horizon_years > MAX_HORIZON_YEARS
    {
        return Err(format!("--retirement-horizon-years must be <= {MAX_HORIZON_YEARS}"));
    }

    if let Some(years) = cli.decumulation_years {
        if !years.is_finite() || years <= 0.0 || years > MAX_HORIZON_YEARS {
            return Err(format!("--decumulation-years must be > 0 and <= {MAX_HORIZON_YEARS}"));
        }
    }

    if !cli.annual_volatility.is_finite() || cli.annual_volatility < 0.0 {
        return Err("--annual-volatility must be >= 0".to_string());
    }

    if cli.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }

    if !(cli.target_success > 0.0 && cli.target_success < 100.0) {
        return Err("--target-success must be between 0 and 100 (exclusive)".to_string());
    }

    Ok(PlanParameters {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        nominal_annual_return: cli.nominal_annual_return / 100.0,
        annual_inflation: cli.annual_inflation / 100.0,
        annual_fee: cli.annual_fee / 100.0,
        tax_rate_on_gains: cli.tax_rate_on_gains / 100.0,
        tax_rate_on_withdrawals: cli.tax_rate_on_withdrawals / 100.0,
        target_monthly_withdrawal_today: cli.target_monthly_withdrawal_today,
        retirement_model: model,
        max_annual_withdrawal_rate: cli.max_annual_withdrawal_rate / 100.0,
        retirement_horizon_years: cli.retirement_horizon_years,
        decumulation_years: cli.decumulation_years,
        current_assets: cli.current_assets,
        contribute_at_end: cli.contribute_at_end,
        annual_volatility: cli.annual_volatility / 100.0,
        trials: cli.trials,
        target_success_probability: cli.target_success / 100.0,
        seed: cli.seed,
    })
}

fn build_deltas(cli: &Cli) -> ScenarioDeltas {
    ScenarioDeltas {
        optimistic_return_delta: cli.optimistic_return_delta / 100.0,
        optimistic_inflation_delta: cli.optimistic_inflation_delta / 100.0,
        pessimistic_return_delta: cli.pessimistic_return_delta / 100.0,
        pessimistic_inflation_delta: cli.pessimistic_inflation_delta / 100.0,
    }
}

/// One-shot command line run: parses `args`, computes the selected mode and returns the
/// report as pretty JSON.
pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Ok(e.to_string());
        }
        Err(e) => return Err(e.to_string()),
    };
    let inputs = build_inputs(&cli)?;

    let json = match cli.mode {
        CliCalcMode::Deterministic => {
            let scenarios =
                compute_scenarios(&inputs, build_deltas(&cli)).map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&scenarios)
        }
        CliCalcMode::MonteCarlo => {
            let response = monte_carlo_response(&inputs).map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&response)
        }
    };
    json.map_err(|e| format!("Failed to serialize report: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/deterministic",
            get(deterministic_get_handler).post(deterministic_post_handler),
        )
        .route(
            "/api/monte-carlo",
            get(monte_carlo_get_handler).post(monte_carlo_post_handler),
        )
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", None)
}

async fn deterministic_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    deterministic_handler_impl(payload).await
}

async fn deterministic_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    deterministic_handler_impl(payload).await
}

async fn monte_carlo_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    monte_carlo_handler_impl(payload).await
}

async fn monte_carlo_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    monte_carlo_handler_impl(payload).await
}

async fn deterministic_handler_impl(payload: PlanPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return bad_request(&msg),
    };

    match compute_scenarios(&request.inputs, request.deltas) {
        Ok(scenarios) => {
            info!(
                required = scenarios.base.required_monthly_contribution_real,
                "deterministic projection served"
            );
            json_response(StatusCode::OK, scenarios)
        }
        Err(err) => plan_error_response(&err),
    }
}

async fn monte_carlo_handler_impl(payload: PlanPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return bad_request(&msg),
    };

    let inputs = request.inputs;
    let joined = tokio::task::spawn_blocking(move || monte_carlo_response(&inputs)).await;
    match joined {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => plan_error_response(&err),
        Err(join_err) => {
            error!(error = %join_err, "monte carlo worker failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Monte Carlo computation failed",
                None,
            )
        }
    }
}

fn monte_carlo_response(inputs: &PlanParameters) -> Result<MonteCarloResponse, PlanError> {
    let deterministic =
        compute_deterministic(inputs, inputs.nominal_annual_return, inputs.annual_inflation)?;
    let monte_carlo = compute_monte_carlo(inputs, inputs.annual_inflation)?;
    Ok(MonteCarloResponse {
        target_success_probability: inputs.target_success_probability,
        annual_volatility: inputs.annual_volatility,
        deterministic,
        monte_carlo,
    })
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str, field: Option<&'static str>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            field,
        },
    )
}

fn bad_request(msg: &str) -> Response {
    warn!(reason = msg, "rejected plan request");
    error_response(StatusCode::BAD_REQUEST, msg, None)
}

fn plan_error_response(err: &PlanError) -> Response {
    warn!(field = err.field(), error = %err, "invalid plan configuration");
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        &err.to_string(),
        Some(err.field()),
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: PlanPayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }

    if let Some(v) = payload.nominal_annual_return {
        cli.nominal_annual_return = v;
    }
    if let Some(v) = payload.annual_inflation {
        cli.annual_inflation = v;
    }
    if let Some(v) = payload.optimistic_return_delta {
        cli.optimistic_return_delta = v;
    }
    if let Some(v) = payload.optimistic_inflation_delta {
        cli.optimistic_inflation_delta = v;
    }
    if let Some(v) = payload.pessimistic_return_delta {
        cli.pessimistic_return_delta = v;
    }
    if let Some(v) = payload.pessimistic_inflation_delta {
        cli.pessimistic_inflation_delta = v;
    }

    if let Some(v) = payload.annual_fee {
        cli.annual_fee = v;
    }
    if let Some(v) = payload.tax_rate_on_gains {
        cli.tax_rate_on_gains = v;
    }
    if let Some(v) = payload.tax_rate_on_withdrawals {
        cli.tax_rate_on_withdrawals = v;
    }

    if let Some(v) = payload.target_monthly_withdrawal_today {
        cli.target_monthly_withdrawal_today = v;
    }
    if let Some(v) = payload.retirement_model {
        cli.retirement_model = v.into();
    }
    if let Some(v) = payload.max_annual_withdrawal_rate {
        cli.max_annual_withdrawal_rate = v;
    }
    if let Some(v) = payload.retirement_horizon_years {
        cli.retirement_horizon_years = v;
    }
    if let Some(v) = payload.decumulation_years {
        cli.decumulation_years = Some(v);
    }

    if let Some(v) = payload.current_assets {
        cli.current_assets = v;
    }
    if let Some(v) = payload.contribute_at_end {
        cli.contribute_at_end = v;
    }

    if let Some(v) = payload.annual_volatility {
        cli.annual_volatility = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.target_success {
        cli.target_success = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    let inputs = build_inputs(&cli)?;
    Ok(ApiRequest {
        inputs,
        deltas: build_deltas(&cli),
    })
}

fn default_cli_for_api() -> Cli {
    Cli::parse_from(["nestegg"])
}
