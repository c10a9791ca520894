use std::path::Path;

use rusqlite::Connection;
use rust_decimal_macros::dec;

use ev_metering::adapters::db::{
    DbError, insert_credential, insert_meter_sample, insert_session, insert_session_parameters,
    insert_tenant, open_connection, run_migrations, schema_version, upsert_wallet_balance,
};
use ev_metering::domain::clock::{Clock, SystemClock, TimestampMs};
use ev_metering::domain::models::{
    BillingPlan, CredentialId, EnergyUnit, MeterSample, OwnerId, PowerUnit, Session, SessionId,
    StopChargingBy, TenantId,
};

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create test db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut path = if cfg!(windows) {
        ".\\data\\metering_test.db".to_string()
    } else {
        "./data/metering_test.db".to_string()
    };
    let mut force = false;
    let mut seed_demo = false;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--path requires a value".to_string());
                };
                path = value.clone();
                index += 2;
            }
            "--force" => {
                force = true;
                index += 1;
            }
            "--seed-demo" => {
                seed_demo = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let path_ref = Path::new(&path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    if seed_demo {
        seed_demo_session(&connection, SystemClock.now())
            .map_err(|error| format!("failed to seed demo data: {error}"))?;
        println!("seeded demo session 1 for tenant demo-tenant (owner demo-owner)");
    }

    println!("created/updated test db at: {path}");
    println!("schema version: {version}");
    Ok(())
}

/// One running single-tenant session, twenty minutes in, with a small wallet.
fn seed_demo_session(connection: &Connection, now: TimestampMs) -> Result<(), DbError> {
    let tenant = TenantId("demo-tenant".to_string());
    let owner = OwnerId("demo-owner".to_string());
    let credential = CredentialId("DEMO-TAG-1".to_string());
    let session_id = SessionId(1);

    insert_tenant(connection, &tenant, None, true)?;
    insert_credential(connection, &tenant, &credential, &owner)?;
    insert_session(
        connection,
        &Session {
            id: session_id,
            tenant_id: tenant.clone(),
            charger_id: "demo-charger".to_string(),
            connector_id: 1,
            credential,
            started_at: TimestampMs(now.0 - 20 * 60 * 1_000),
            running: true,
        },
    )?;
    insert_session_parameters(
        connection,
        &tenant,
        session_id,
        &BillingPlan {
            stop_charging_by: StopChargingBy::Energy,
            price: dec!(0.35),
            fixed_starting_fee: dec!(1.00),
            price_include_tax: false,
            tax_percentage: dec!(19),
        },
    )?;
    insert_meter_sample(
        connection,
        &tenant,
        session_id,
        &MeterSample {
            energy_register: 102_400.0,
            energy_unit: EnergyUnit::Wh,
            power: 7_200.0,
            power_unit: PowerUnit::W,
            soc: Some(54.0),
            initial_register_wh: 100_000.0,
        },
        now,
    )?;
    upsert_wallet_balance(connection, &tenant, &owner, dec!(15.00))?;

    Ok(())
}

fn print_help() {
    println!("create_test_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_test_db -- [--path <file>] [--force] [--seed-demo]");
    println!();
    println!("Options:");
    println!(
        "  --path <file>   target sqlite file (default: .\\\\data\\\\metering_test.db on Windows)"
    );
    println!("  --force         delete existing file before creating");
    println!("  --seed-demo     insert one running demo session with plan, sample and wallet");
}
