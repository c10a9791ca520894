pub mod config;
pub mod engine;
mod error;
mod logging;
pub mod notifier;
pub mod remote_stop;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run_api() -> Result<(), AppError> {
    // a missing .env file is fine, the process env is used as is
    let _ = dotenvy::dotenv();
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        charger_control_url = %config.charger_control_url,
        push_configured = config.push_url.is_some(),
        external_call_timeout_ms = config.external_call_timeout_ms,
        org_minimum_reserve = %config.org_minimum_reserve,
        free_usage_policy = ?config.free_usage_policy,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
