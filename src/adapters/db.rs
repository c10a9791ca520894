use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::clock::TimestampMs;
use crate::domain::models::{
    BillingPlan, CredentialId, MeterSample, NotificationConfig, OwnerId, PaymentMethod, Session,
    SessionId, SentNotificationRecord, TenancyMode, TenantId, TenantProfile,
};

pub const LATEST_SCHEMA_VERSION: u32 = 2;

pub const MINIMUM_RESERVE_PROPERTY: &str = "minimum_wallet_balance";

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS tenants (
    tenant_id TEXT PRIMARY KEY,
    enterprise_id TEXT,
    has_own_app INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tenant_properties (
    tenant_id TEXT NOT NULL,
    property_key TEXT NOT NULL,
    property_value TEXT NOT NULL,
    PRIMARY KEY (tenant_id, property_key)
);

CREATE TABLE IF NOT EXISTS credentials (
    tenant_id TEXT NOT NULL,
    id_tag TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id_tag)
);

CREATE INDEX IF NOT EXISTS idx_credentials_owner
ON credentials (tenant_id, owner_id);

CREATE TABLE IF NOT EXISTS enterprise_credentials (
    id_tag TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    tenant_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    charger_id TEXT NOT NULL,
    connector_id INTEGER NOT NULL,
    id_tag TEXT NOT NULL,
    started_at TEXT NOT NULL,
    running INTEGER NOT NULL DEFAULT 1,
    stopped_at TEXT,
    stop_reason TEXT,
    PRIMARY KEY (tenant_id, session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_running_id_tag
ON sessions (tenant_id, running, id_tag);

CREATE TABLE IF NOT EXISTS session_parameters (
    tenant_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    stop_charging_by TEXT NOT NULL,
    price TEXT NOT NULL,
    fixed_starting_fee TEXT NOT NULL DEFAULT '0',
    price_include_tax INTEGER NOT NULL DEFAULT 0,
    tax_percentage TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (tenant_id, session_id)
);

CREATE TABLE IF NOT EXISTS meter_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    energy_import_register REAL NOT NULL,
    energy_import_unit TEXT NOT NULL,
    power_import REAL NOT NULL,
    power_import_unit TEXT NOT NULL,
    soc REAL,
    initial_meter_value REAL NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_meter_samples_session
ON meter_samples (tenant_id, session_id, id DESC);

CREATE TABLE IF NOT EXISTS connectors (
    tenant_id TEXT NOT NULL,
    charger_id TEXT NOT NULL,
    connector_id INTEGER NOT NULL,
    connector_type TEXT,
    PRIMARY KEY (tenant_id, charger_id, connector_id)
);

CREATE TABLE IF NOT EXISTS wallets (
    tenant_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    balance TEXT NOT NULL,
    PRIMARY KEY (tenant_id, owner_id)
);

CREATE TABLE IF NOT EXISTS card_holds (
    hold_id TEXT PRIMARY KEY,
    amount TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_payment_holds (
    tenant_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    hold_id TEXT NOT NULL,
    PRIMARY KEY (tenant_id, session_id)
);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS notification_configs (
    tenant_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    notification_type TEXT NOT NULL,
    notification_value TEXT NOT NULL,
    PRIMARY KEY (tenant_id, session_id)
);

CREATE TABLE IF NOT EXISTS sent_notifications (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    event_name TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sent_notifications_lookup
ON sent_notifications (tenant_id, owner_id, session_id, event_name);
"#,
    ),
];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn parse_column<T: FromStr>(column: &'static str, raw: String) -> Result<T, DbError> {
    raw.parse::<T>()
        .map_err(|_| DbError::InvalidValue { column, value: raw })
}

fn parse_decimal(column: &'static str, raw: String) -> Result<Decimal, DbError> {
    parse_column::<Decimal>(column, raw)
}

// --- tenancy ---------------------------------------------------------------

pub fn insert_tenant(
    connection: &Connection,
    tenant_id: &TenantId,
    enterprise_id: Option<&str>,
    has_own_app: bool,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO tenants (tenant_id, enterprise_id, has_own_app) VALUES (?1, ?2, ?3)",
        params![tenant_id.0, enterprise_id, has_own_app],
    )?;
    Ok(())
}

pub fn get_tenant_profile(
    connection: &Connection,
    tenant_id: &TenantId,
) -> Result<Option<TenantProfile>, DbError> {
    let row: Option<(bool, Option<String>)> = connection
        .query_row(
            "SELECT has_own_app, enterprise_id FROM tenants WHERE tenant_id = ?1",
            params![tenant_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.map(|(has_own_app, enterprise_id)| TenantProfile {
        tenant_id: tenant_id.clone(),
        mode: if has_own_app {
            TenancyMode::SingleTenant
        } else {
            TenancyMode::Enterprise
        },
        enterprise_id: enterprise_id.map(TenantId),
    }))
}

/// Child scopes sharing the enterprise parent of `tenant_id`.
pub fn list_enterprise_scopes(
    connection: &Connection,
    tenant_id: &TenantId,
) -> Result<Vec<TenantId>, DbError> {
    let mut statement = connection.prepare(
        "SELECT child.tenant_id
         FROM tenants AS origin
         JOIN tenants AS child ON child.enterprise_id = origin.enterprise_id
         WHERE origin.tenant_id = ?1
           AND origin.enterprise_id IS NOT NULL
           AND child.has_own_app = 0
         ORDER BY child.tenant_id",
    )?;

    let rows = statement.query_map(params![tenant_id.0], |row| row.get::<_, String>(0))?;

    let mut scopes = Vec::new();
    for row in rows {
        scopes.push(TenantId(row?));
    }

    Ok(scopes)
}

pub fn set_tenant_property(
    connection: &Connection,
    tenant_id: &TenantId,
    key: &str,
    value: &str,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO tenant_properties (tenant_id, property_key, property_value)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (tenant_id, property_key) DO UPDATE SET property_value = excluded.property_value",
        params![tenant_id.0, key, value],
    )?;
    Ok(())
}

pub fn get_minimum_reserve(
    connection: &Connection,
    tenant_id: &TenantId,
) -> Result<Option<Decimal>, DbError> {
    let raw: Option<String> = connection
        .query_row(
            "SELECT property_value FROM tenant_properties
             WHERE tenant_id = ?1 AND property_key = ?2",
            params![tenant_id.0, MINIMUM_RESERVE_PROPERTY],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|raw| parse_decimal("tenant_properties.property_value", raw))
        .transpose()
}

// --- credentials -----------------------------------------------------------

pub fn insert_credential(
    connection: &Connection,
    tenant_id: &TenantId,
    credential: &CredentialId,
    owner_id: &OwnerId,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO credentials (tenant_id, id_tag, owner_id) VALUES (?1, ?2, ?3)",
        params![tenant_id.0, credential.0, owner_id.0],
    )?;
    Ok(())
}

pub fn insert_enterprise_credential(
    connection: &Connection,
    credential: &CredentialId,
    owner_id: &OwnerId,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO enterprise_credentials (id_tag, owner_id) VALUES (?1, ?2)",
        params![credential.0, owner_id.0],
    )?;
    Ok(())
}

pub fn get_owner_of_credential(
    connection: &Connection,
    tenant_id: &TenantId,
    credential: &CredentialId,
) -> Result<Option<OwnerId>, DbError> {
    let owner: Option<String> = connection
        .query_row(
            "SELECT owner_id FROM credentials WHERE tenant_id = ?1 AND id_tag = ?2
             UNION ALL
             SELECT owner_id FROM enterprise_credentials WHERE id_tag = ?2
             LIMIT 1",
            params![tenant_id.0, credential.0],
            |row| row.get(0),
        )
        .optional()?;

    Ok(owner.map(OwnerId))
}

pub fn list_credentials_for_owner(
    connection: &Connection,
    tenant_id: &TenantId,
    owner_id: &OwnerId,
) -> Result<Vec<CredentialId>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id_tag FROM credentials WHERE tenant_id = ?1 AND owner_id = ?2 ORDER BY id_tag",
    )?;
    let rows = statement.query_map(params![tenant_id.0, owner_id.0], |row| {
        row.get::<_, String>(0)
    })?;

    let mut credentials = Vec::new();
    for row in rows {
        credentials.push(CredentialId(row?));
    }

    Ok(credentials)
}

pub fn list_enterprise_credentials(
    connection: &Connection,
    owner_id: &OwnerId,
) -> Result<Vec<CredentialId>, DbError> {
    let mut statement = connection
        .prepare("SELECT id_tag FROM enterprise_credentials WHERE owner_id = ?1 ORDER BY id_tag")?;
    let rows = statement.query_map(params![owner_id.0], |row| row.get::<_, String>(0))?;

    let mut credentials = Vec::new();
    for row in rows {
        credentials.push(CredentialId(row?));
    }

    Ok(credentials)
}

// --- sessions --------------------------------------------------------------

struct SessionRow {
    tenant_id: String,
    session_id: i64,
    charger_id: String,
    connector_id: u32,
    id_tag: String,
    started_at: String,
    running: bool,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, DbError> {
        let started_at =
            TimestampMs::from_rfc3339(&self.started_at).ok_or(DbError::InvalidValue {
                column: "sessions.started_at",
                value: self.started_at,
            })?;

        Ok(Session {
            id: SessionId(self.session_id),
            tenant_id: TenantId(self.tenant_id),
            charger_id: self.charger_id,
            connector_id: self.connector_id,
            credential: CredentialId(self.id_tag),
            started_at,
            running: self.running,
        })
    }
}

const SESSION_COLUMNS: &str =
    "tenant_id, session_id, charger_id, connector_id, id_tag, started_at, running";

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        tenant_id: row.get(0)?,
        session_id: row.get(1)?,
        charger_id: row.get(2)?,
        connector_id: row.get(3)?,
        id_tag: row.get(4)?,
        started_at: row.get(5)?,
        running: row.get(6)?,
    })
}

pub fn insert_session(connection: &Connection, session: &Session) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO sessions (tenant_id, session_id, charger_id, connector_id, id_tag, started_at, running)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session.tenant_id.0,
            session.id.0,
            session.charger_id,
            session.connector_id,
            session.credential.0,
            session.started_at.to_rfc3339(),
            session.running,
        ],
    )?;
    Ok(())
}

pub fn get_running_session(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<Option<Session>, DbError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE tenant_id = ?1 AND session_id = ?2 AND running = 1"
    );
    let row = connection
        .query_row(&sql, params![tenant_id.0, session_id.0], map_session_row)
        .optional()?;

    row.map(SessionRow::into_session).transpose()
}

pub fn list_running_sessions(
    connection: &Connection,
    tenant_id: &TenantId,
    credentials: &[CredentialId],
) -> Result<Vec<Session>, DbError> {
    if credentials.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = (0..credentials.len())
        .map(|index| format!("?{}", index + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE tenant_id = ?1 AND running = 1 AND id_tag IN ({placeholders})
         ORDER BY session_id"
    );

    let values = std::iter::once(tenant_id.0.as_str())
        .chain(credentials.iter().map(|credential| credential.0.as_str()));

    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map(params_from_iter(values), map_session_row)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?.into_session()?);
    }

    Ok(sessions)
}

/// Marks a session finished; rows are never deleted. Returns whether a
/// running session was updated.
pub fn mark_session_stopped(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    stopped_at: TimestampMs,
    reason: &str,
) -> Result<bool, DbError> {
    let updated = connection.execute(
        "UPDATE sessions SET running = 0, stopped_at = ?3, stop_reason = ?4
         WHERE tenant_id = ?1 AND session_id = ?2 AND running = 1",
        params![tenant_id.0, session_id.0, stopped_at.to_rfc3339(), reason],
    )?;
    Ok(updated > 0)
}

// --- billing plan and meter samples ----------------------------------------

pub fn insert_session_parameters(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    plan: &BillingPlan,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO session_parameters
            (tenant_id, session_id, stop_charging_by, price, fixed_starting_fee, price_include_tax, tax_percentage)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tenant_id.0,
            session_id.0,
            plan.stop_charging_by.as_str(),
            plan.price.to_string(),
            plan.fixed_starting_fee.to_string(),
            plan.price_include_tax,
            plan.tax_percentage.to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_billing_plan(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<Option<BillingPlan>, DbError> {
    let row: Option<(String, String, String, bool, String)> = connection
        .query_row(
            "SELECT stop_charging_by, price, fixed_starting_fee, price_include_tax, tax_percentage
             FROM session_parameters WHERE tenant_id = ?1 AND session_id = ?2",
            params![tenant_id.0, session_id.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;

    let Some((stop_charging_by, price, fixed_starting_fee, price_include_tax, tax_percentage)) = row
    else {
        return Ok(None);
    };

    Ok(Some(BillingPlan {
        stop_charging_by: parse_column("session_parameters.stop_charging_by", stop_charging_by)?,
        price: parse_decimal("session_parameters.price", price)?,
        fixed_starting_fee: parse_decimal(
            "session_parameters.fixed_starting_fee",
            fixed_starting_fee,
        )?,
        price_include_tax,
        tax_percentage: parse_decimal("session_parameters.tax_percentage", tax_percentage)?,
    }))
}

pub fn insert_meter_sample(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    sample: &MeterSample,
    recorded_at: TimestampMs,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO meter_samples
            (tenant_id, session_id, energy_import_register, energy_import_unit, power_import,
             power_import_unit, soc, initial_meter_value, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            tenant_id.0,
            session_id.0,
            sample.energy_register,
            sample.energy_unit.as_str(),
            sample.power,
            sample.power_unit.as_str(),
            sample.soc,
            sample.initial_register_wh,
            recorded_at.to_rfc3339(),
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn get_latest_meter_sample(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<Option<MeterSample>, DbError> {
    let row: Option<(f64, String, f64, String, Option<f64>, f64)> = connection
        .query_row(
            "SELECT energy_import_register, energy_import_unit, power_import, power_import_unit,
                    soc, initial_meter_value
             FROM meter_samples
             WHERE tenant_id = ?1 AND session_id = ?2
             ORDER BY id DESC
             LIMIT 1",
            params![tenant_id.0, session_id.0],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;

    let Some((energy_register, energy_unit, power, power_unit, soc, initial_register_wh)) = row
    else {
        return Ok(None);
    };

    Ok(Some(MeterSample {
        energy_register,
        energy_unit: parse_column("meter_samples.energy_import_unit", energy_unit)?,
        power,
        power_unit: parse_column("meter_samples.power_import_unit", power_unit)?,
        soc,
        initial_register_wh,
    }))
}

/// Raw energy registers of the most recent samples, newest first.
pub fn list_recent_energy_registers(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    limit: usize,
) -> Result<Vec<f64>, DbError> {
    let mut statement = connection.prepare(
        "SELECT energy_import_register FROM meter_samples
         WHERE tenant_id = ?1 AND session_id = ?2
         ORDER BY id DESC
         LIMIT ?3",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = statement.query_map(params![tenant_id.0, session_id.0, limit], |row| {
        row.get::<_, f64>(0)
    })?;

    let mut registers = Vec::new();
    for row in rows {
        registers.push(row?);
    }

    Ok(registers)
}

pub fn insert_connector(
    connection: &Connection,
    tenant_id: &TenantId,
    charger_id: &str,
    connector_id: u32,
    connector_type: Option<&str>,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO connectors (tenant_id, charger_id, connector_id, connector_type)
         VALUES (?1, ?2, ?3, ?4)",
        params![tenant_id.0, charger_id, connector_id, connector_type],
    )?;
    Ok(())
}

pub fn get_connector_type(
    connection: &Connection,
    tenant_id: &TenantId,
    charger_id: &str,
    connector_id: u32,
) -> Result<Option<String>, DbError> {
    let connector_type: Option<Option<String>> = connection
        .query_row(
            "SELECT connector_type FROM connectors
             WHERE tenant_id = ?1 AND charger_id = ?2 AND connector_id = ?3",
            params![tenant_id.0, charger_id, connector_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(connector_type.flatten())
}

// --- funds -----------------------------------------------------------------

pub fn upsert_wallet_balance(
    connection: &Connection,
    tenant_id: &TenantId,
    owner_id: &OwnerId,
    balance: Decimal,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO wallets (tenant_id, owner_id, balance) VALUES (?1, ?2, ?3)
         ON CONFLICT (tenant_id, owner_id) DO UPDATE SET balance = excluded.balance",
        params![tenant_id.0, owner_id.0, balance.to_string()],
    )?;
    Ok(())
}

/// `None` when the owner has no wallet in `tenant_id`.
pub fn get_wallet_balance(
    connection: &Connection,
    tenant_id: &TenantId,
    owner_id: &OwnerId,
) -> Result<Option<Decimal>, DbError> {
    let raw: Option<String> = connection
        .query_row(
            "SELECT balance FROM wallets WHERE tenant_id = ?1 AND owner_id = ?2",
            params![tenant_id.0, owner_id.0],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|raw| parse_decimal("wallets.balance", raw))
        .transpose()
}

pub fn insert_card_hold(
    connection: &Connection,
    hold_id: &str,
    amount: Decimal,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO card_holds (hold_id, amount) VALUES (?1, ?2)",
        params![hold_id, amount.to_string()],
    )?;
    Ok(())
}

pub fn link_session_payment_hold(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    hold_id: &str,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO session_payment_holds (tenant_id, session_id, hold_id) VALUES (?1, ?2, ?3)",
        params![tenant_id.0, session_id.0, hold_id],
    )?;
    Ok(())
}

/// Sessions without a card hold are paid from the wallet.
pub fn get_payment_method(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<PaymentMethod, DbError> {
    let hold_id: Option<String> = connection
        .query_row(
            "SELECT hold_id FROM session_payment_holds WHERE tenant_id = ?1 AND session_id = ?2",
            params![tenant_id.0, session_id.0],
            |row| row.get(0),
        )
        .optional()?;

    Ok(hold_id.map_or(PaymentMethod::Wallet, PaymentMethod::CardHold))
}

pub fn get_card_hold_amount(
    connection: &Connection,
    hold_id: &str,
) -> Result<Option<Decimal>, DbError> {
    let raw: Option<String> = connection
        .query_row(
            "SELECT amount FROM card_holds WHERE hold_id = ?1",
            params![hold_id],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|raw| parse_decimal("card_holds.amount", raw))
        .transpose()
}

// --- notifications ---------------------------------------------------------

pub fn get_notification_config(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<Option<NotificationConfig>, DbError> {
    let row: Option<(String, String)> = connection
        .query_row(
            "SELECT notification_type, notification_value FROM notification_configs
             WHERE tenant_id = ?1 AND session_id = ?2",
            params![tenant_id.0, session_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(kind, value)| {
        Ok(NotificationConfig {
            kind: parse_column("notification_configs.notification_type", kind)?,
            value,
        })
    })
    .transpose()
}

pub fn upsert_notification_config(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
    config: &NotificationConfig,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO notification_configs (tenant_id, session_id, notification_type, notification_value)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (tenant_id, session_id) DO UPDATE SET
            notification_type = excluded.notification_type,
            notification_value = excluded.notification_value",
        params![tenant_id.0, session_id.0, config.kind.as_str(), config.value],
    )?;
    Ok(())
}

pub fn delete_notification_config(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<bool, DbError> {
    let deleted = connection.execute(
        "DELETE FROM notification_configs WHERE tenant_id = ?1 AND session_id = ?2",
        params![tenant_id.0, session_id.0],
    )?;
    Ok(deleted > 0)
}

pub fn sent_notification_exists(
    connection: &Connection,
    owner_id: &OwnerId,
    tenant_id: &TenantId,
    session_id: SessionId,
    event_name: &str,
) -> Result<bool, DbError> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM sent_notifications
         WHERE tenant_id = ?1 AND owner_id = ?2 AND session_id = ?3 AND event_name = ?4",
        params![tenant_id.0, owner_id.0, session_id.0, event_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_sent_notification(
    connection: &Connection,
    record: &SentNotificationRecord,
    created_at: TimestampMs,
) -> Result<String, DbError> {
    let id = uuid::Uuid::new_v4().to_string();
    connection.execute(
        "INSERT INTO sent_notifications
            (id, tenant_id, owner_id, session_id, event_name, payload_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            record.session.tenant_id.0,
            record.owner_id.0,
            record.session.session_id.0,
            record.event_name,
            record.payload_json,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(id)
}

pub fn delete_sent_notifications_of_session(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<usize, DbError> {
    let deleted = connection.execute(
        "DELETE FROM sent_notifications WHERE tenant_id = ?1 AND session_id = ?2",
        params![tenant_id.0, session_id.0],
    )?;
    Ok(deleted)
}

pub fn count_sent_notifications(
    connection: &Connection,
    tenant_id: &TenantId,
    session_id: SessionId,
) -> Result<i64, DbError> {
    let count = connection.query_row(
        "SELECT COUNT(*) FROM sent_notifications WHERE tenant_id = ?1 AND session_id = ?2",
        params![tenant_id.0, session_id.0],
        |row| row.get(0),
    )?;
    Ok(count)
}
