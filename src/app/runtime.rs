use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_cors::Cors;
use actix_web::middleware::Condition;
use actix_web::{App, HttpServer, web};
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::charger_control::HttpChargerControl;
use crate::adapters::live::InMemoryConnectionRegistry;
use crate::adapters::push::{HttpPushNotifier, LogOnlyPushNotifier, PushNotifier};
use crate::app::config::AppConfig;
use crate::app::engine::MeteringEngine;
use crate::app::error::AppError;
use crate::app::services::SqliteMeteringStore;
use crate::domain::clock::SystemClock;

pub fn build_engine(
    config: &AppConfig,
    connection: Connection,
) -> Result<MeteringEngine, AppError> {
    let store = SqliteMeteringStore::new(Arc::new(Mutex::new(connection)));
    let schema_version = store.schema_version().map_err(AppError::database_init)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.external_call_timeout_ms))
        .build()
        .map_err(AppError::runtime)?;

    let push: Arc<dyn PushNotifier> = match &config.push_url {
        Some(url) => Arc::new(HttpPushNotifier::new(client.clone(), url.as_str())),
        None => {
            tracing::warn!("PUSH_URL not set, push notifications are only logged");
            Arc::new(LogOnlyPushNotifier)
        }
    };

    tracing::info!(schema_version, "metering store ready");

    Ok(MeteringEngine::new(
        Arc::new(store),
        Arc::new(HttpChargerControl::new(client, &config.charger_control_url)),
        push,
        Arc::new(InMemoryConnectionRegistry::new()),
        Arc::new(SystemClock),
        config.engine_settings(),
    ))
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let mut connection =
        crate::adapters::db::open_connection(&config.db_path).map_err(AppError::database_init)?;
    crate::adapters::db::run_migrations(&mut connection).map_err(AppError::database_init)?;

    let api_state = ApiState {
        engine: Arc::new(build_engine(&config, connection)?),
    };
    let cors_permissive = config.cors_permissive;

    tracing::info!(bind = %config.http_bind, cors_permissive, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(Condition::new(cors_permissive, Cors::permissive()))
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .bind(&config.http_bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}
