use crate::RecentError;
use rusqlite::{Connection, Transaction};
use rusqlite_migration::{HookResult, M, Migrations};
use std::sync::LazyLock;

/// Schema generation this release reads and writes.
pub const SCHEMA_VERSION: usize = 1;

const CREATE_COMMANDS: &str = "
CREATE TABLE commands (
    command_dt  TIMESTAMP,
    command     TEXT,
    pid         INT,
    return_val  INT,
    pwd         TEXT,
    session     TEXT
);";

const CREATE_COMMANDS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_commands_dt ON commands(command_dt DESC);";

pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![M::up_with_hook(
        "
CREATE TABLE IF NOT EXISTS sessions (
    session     TEXT PRIMARY KEY NOT NULL,
    created_dt  TIMESTAMP,
    updated_dt  TIMESTAMP,
    term        TEXT,
    hostname    TEXT,
    user        TEXT,
    sequence    INT
);
",
        adopt_commands_table,
    )])
});

/// Version 1 either builds `commands` from scratch or links a pre-versioning
/// table to sessions. Safe to rerun against a half-migrated store.
fn adopt_commands_table(tx: &Transaction) -> HookResult {
    if table_exists(tx, "commands")? {
        if !column_exists(tx, "commands", "session")? {
            log::info!("migrating schema to version {SCHEMA_VERSION}");
            tx.execute_batch("ALTER TABLE commands ADD COLUMN session TEXT;")?;
        }
    } else {
        log::info!("building schema");
        tx.execute_batch(CREATE_COMMANDS)?;
    }
    tx.execute_batch(CREATE_COMMANDS_INDEX)?;
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |r| r.get(0),
    )
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        [table, column],
        |r| r.get(0),
    )
}

/// Version marker as stored in `PRAGMA user_version`; unreadable counts as 0.
pub fn stored_version(conn: &Connection) -> usize {
    conn.pragma_query_value(None, "user_version", |r| r.get::<_, i64>(0))
        .map(|v| usize::try_from(v).unwrap_or(0))
        .unwrap_or(0)
}

/// Bring the store to `SCHEMA_VERSION`, refusing stores written by newer releases.
pub fn ensure_current(conn: &mut Connection) -> Result<(), RecentError> {
    let found = stored_version(conn);
    if found > SCHEMA_VERSION {
        return Err(RecentError::SchemaIncompatible {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }
    log::debug!("schema at version {found}, migrating to {SCHEMA_VERSION}");
    MIGRATIONS.to_latest(conn)?;
    Ok(())
}
