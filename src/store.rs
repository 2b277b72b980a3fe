use crate::config::StoreConfig;
use crate::query::HistoryQuery;
use crate::schema::{self, ensure_current};
use crate::RecentError;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{
    Connection, OptionalExtension, Row, Statement, Transaction, TransactionBehavior, params,
    params_from_iter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[cfg(unix)]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        // Only tighten dirs we created
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    if db_path.exists() {
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn apply_pragmas(conn: &Connection, settings: &StoreConfig) -> Result<(), RecentError> {
    conn.busy_timeout(settings.busy_timeout())?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Open a connection with pragmas applied and the schema brought current.
pub fn open_db(db_path: &Path, settings: &StoreConfig) -> Result<Connection, RecentError> {
    ensure_secure_permissions(db_path)?;

    let mut conn = Connection::open(db_path)?;
    apply_pragmas(&conn, settings)?;
    ensure_current(&mut conn)?;

    // Set file permissions after DB creation
    #[cfg(unix)]
    {
        if db_path.exists() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    Ok(conn)
}

/// Open an existing store for inspection. No migration runs and nothing is
/// created, so stores from older and newer releases can both be reported on.
pub fn open_db_readonly(db_path: &Path, settings: &StoreConfig) -> Result<Connection, RecentError> {
    if !db_path.exists() {
        return Err(RecentError::Config(format!(
            "database not found: {}",
            db_path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(settings.busy_timeout())?;
    Ok(conn)
}

/// Row counts for whichever tables exist at the stored schema version.
pub fn read_counts(conn: &Connection) -> Result<StoreCounts, RecentError> {
    let count = |table: &str| -> Result<i64, RecentError> {
        if !schema::table_exists(conn, table)? {
            return Ok(0);
        }
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    };
    let commands = count("commands")?;
    let sessions = count("sessions")?;
    let last_command: Option<String> = if schema::table_exists(conn, "commands")? {
        conn.query_row("SELECT MAX(command_dt) FROM commands", [], |r| {
            r.get_ref(0).map(lossy_text)
        })?
    } else {
        None
    };
    Ok(StoreCounts {
        schema_version: schema::stored_version(conn),
        commands,
        sessions,
        last_command,
    })
}

/// Persistence boundary. The connection opens on first use and is held for
/// the rest of the invocation.
pub struct Store {
    path: PathBuf,
    settings: StoreConfig,
    conn: Option<Connection>,
}

impl Store {
    pub fn new(path: &Path, settings: &StoreConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            settings: settings.clone(),
            conn: None,
        }
    }

    pub fn settings(&self) -> &StoreConfig {
        &self.settings
    }

    fn connection(&mut self) -> Result<&mut Connection, RecentError> {
        let conn = match self.conn.take() {
            Some(c) => c,
            None => open_db(&self.path, &self.settings)?,
        };
        Ok(self.conn.insert(conn))
    }

    /// Start a write transaction holding the write lock from the outset.
    pub fn write(&mut self) -> Result<Transaction<'_>, RecentError> {
        let conn = self.connection()?;
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn cursor(&mut self, query: &HistoryQuery) -> Result<HistoryCursor<'_>, RecentError> {
        log::debug!("query: {} {:?}", query.sql, query.params);
        let conn = self.connection()?;
        let stmt = conn.prepare(&query.sql)?;
        Ok(HistoryCursor {
            stmt,
            params: query.params.clone(),
        })
    }

    /// Open the connection now, migrating if needed. Later calls reuse it.
    pub fn connect(&mut self) -> Result<(), RecentError> {
        self.connection().map(|_| ())
    }

    pub fn counts(&mut self) -> Result<StoreCounts, RecentError> {
        read_counts(self.connection()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub schema_version: usize,
    pub commands: i64,
    pub sessions: i64,
    pub last_command: Option<String>,
}

/// One row of query output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: Option<String>,
    pub command: Option<String>,
}

/// Text columns written by older releases may hold bytes that are not UTF-8.
fn lossy_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(b) | ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

impl HistoryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HistoryEntry {
            timestamp: lossy_text(row.get_ref(0)?),
            command: lossy_text(row.get_ref(1)?),
        })
    }

    /// Legacy rows may lack either column; those are not displayed.
    pub fn is_complete(&self) -> bool {
        matches!((&self.timestamp, &self.command), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
    }
}

/// Prepared history query; rows are pulled from SQLite one at a time.
pub struct HistoryCursor<'conn> {
    stmt: Statement<'conn>,
    params: Vec<Value>,
}

impl HistoryCursor<'_> {
    pub fn rows(&mut self) -> Result<impl Iterator<Item = Result<HistoryEntry, RecentError>> + '_, RecentError> {
        let rows = self
            .stmt
            .query_map(params_from_iter(self.params.iter()), HistoryEntry::from_row)?;
        Ok(rows.map(|r| r.map_err(RecentError::from)))
    }
}

/// A command accepted for logging. The timestamp comes from the store clock.
#[derive(Debug, Clone)]
pub struct NewCommand<'a> {
    pub command: &'a str,
    pub pid: i64,
    pub return_val: i64,
    pub pwd: &'a str,
    pub session: Option<&'a str>,
}

pub fn append_command(conn: &Connection, cmd: &NewCommand<'_>) -> Result<i64, RecentError> {
    conn.execute(
        "INSERT INTO commands (command_dt, command, pid, return_val, pwd, session)
         VALUES (datetime('now','localtime'), ?1, ?2, ?3, ?4, ?5)",
        params![cmd.command, cmd.pid, cmd.return_val, cmd.pwd, cmd.session],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Terminal metadata stored alongside a session fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session: String,
    pub term: String,
    pub hostname: String,
    pub user: String,
    pub sequence: i64,
}

/// Last-seen sequence for a session, if the session is known.
pub fn find_session(conn: &Connection, session: &str) -> Result<Option<i64>, RecentError> {
    let seq = conn
        .query_row(
            "SELECT sequence FROM sessions WHERE session = ?1",
            params![session],
            |r| r.get(0),
        )
        .optional()?;
    Ok(seq)
}

pub fn insert_session(conn: &Connection, record: &SessionRecord) -> Result<(), RecentError> {
    conn.execute(
        "INSERT INTO sessions (session, created_dt, updated_dt, term, hostname, user, sequence)
         VALUES (?1, datetime('now','localtime'), datetime('now','localtime'), ?2, ?3, ?4, ?5)",
        params![
            record.session,
            record.term,
            record.hostname,
            record.user,
            record.sequence
        ],
    )?;
    Ok(())
}

pub fn update_session(conn: &Connection, session: &str, sequence: i64) -> Result<(), RecentError> {
    conn.execute(
        "UPDATE sessions SET updated_dt = datetime('now','localtime'), sequence = ?1 WHERE session = ?2",
        params![sequence, session],
    )?;
    Ok(())
}

/// Retry `op` while it reports `Busy`, backing off exponentially, until the
/// lock timeout is spent.
pub fn with_lock_retry<T, F>(settings: &StoreConfig, mut op: F) -> Result<T, RecentError>
where
    F: FnMut() -> Result<T, RecentError>,
{
    const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
    const MAX_BACKOFF: Duration = Duration::from_millis(200);

    let deadline = Instant::now() + settings.lock_timeout();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match op() {
            Err(e) if e.is_busy() => {
                let now = Instant::now();
                if now >= deadline {
                    log::debug!("store still locked after {attempts} attempts");
                    return Err(RecentError::Busy);
                }
                std::thread::sleep(backoff.min(deadline - now));
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> StoreConfig {
        StoreConfig {
            busy_timeout_ms: 10,
            lock_timeout_ms: 50,
        }
    }

    #[test]
    fn store_opens_lazily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let mut store = Store::new(&path, &settings());
        assert!(!path.exists());

        let counts = store.counts().unwrap();
        assert!(path.exists());
        assert_eq!(counts.schema_version, schema::SCHEMA_VERSION);
        assert_eq!(counts.commands, 0);
        assert_eq!(counts.sessions, 0);
        assert_eq!(counts.last_command, None);
    }

    #[cfg(unix)]
    #[test]
    fn database_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        open_db(&path, &settings()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn append_and_session_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(&dir.path().join("h.db"), &settings());

        {
            let tx = store.write().unwrap();
            assert_eq!(find_session(&tx, "abc").unwrap(), None);
            insert_session(
                &tx,
                &SessionRecord {
                    session: "abc".into(),
                    term: "xterm".into(),
                    hostname: "box".into(),
                    user: "me".into(),
                    sequence: 4,
                },
            )
            .unwrap();
            append_command(
                &tx,
                &NewCommand {
                    command: "ls -la",
                    pid: 99,
                    return_val: 0,
                    pwd: "/tmp",
                    session: Some("abc"),
                },
            )
            .unwrap();
            update_session(&tx, "abc", 5).unwrap();
            assert_eq!(find_session(&tx, "abc").unwrap(), Some(5));
            tx.commit().unwrap();
        }

        let counts = store.counts().unwrap();
        assert_eq!(counts.commands, 1);
        assert_eq!(counts.sessions, 1);
        assert!(counts.last_command.is_some());
    }

    #[test]
    fn uncommitted_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(&dir.path().join("h.db"), &settings());
        {
            let tx = store.write().unwrap();
            append_command(
                &tx,
                &NewCommand {
                    command: "ls",
                    pid: 1,
                    return_val: 0,
                    pwd: "/",
                    session: None,
                },
            )
            .unwrap();
        }
        assert_eq!(store.counts().unwrap().commands, 0);
    }

    #[test]
    fn cursor_streams_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(&dir.path().join("h.db"), &settings());
        {
            let tx = store.write().unwrap();
            for cmd in ["one", "two"] {
                append_command(
                    &tx,
                    &NewCommand {
                        command: cmd,
                        pid: 1,
                        return_val: 0,
                        pwd: "/",
                        session: None,
                    },
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }

        let query = crate::query::QueryFilters {
            limit: "10".into(),
            ..Default::default()
        }
        .build()
        .unwrap();
        let mut cursor = store.cursor(&query).unwrap();
        let cmds: Vec<String> = cursor
            .rows()
            .unwrap()
            .map(|r| r.unwrap().command.unwrap())
            .collect();
        assert_eq!(cmds, vec!["one", "two"]);
    }

    #[test]
    fn cursor_survives_invalid_utf8_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.db");
        let mut store = Store::new(&path, &settings());
        store.counts().unwrap();
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "INSERT INTO commands (command_dt, command, pwd)
                 VALUES ('2016-01-01 00:00:00', CAST(X'6563686f20636166e9' AS TEXT), '/');",
            )
            .unwrap();

        let query = crate::query::QueryFilters {
            limit: "10".into(),
            ..Default::default()
        }
        .build()
        .unwrap();
        let mut cursor = store.cursor(&query).unwrap();
        let entries: Vec<HistoryEntry> = cursor.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command.as_deref(), Some("echo caf\u{FFFD}"));
        assert_eq!(entries[0].timestamp.as_deref(), Some("2016-01-01 00:00:00"));
    }

    #[test]
    fn readonly_counts_leave_legacy_store_unmigrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE commands (command_dt timestamp, command text, pid int, return_val int, pwd text);
                 INSERT INTO commands VALUES ('2016-10-01 10:00:00', 'ls', 1, 0, '/');",
            )
            .unwrap();

        let conn = open_db_readonly(&path, &settings()).unwrap();
        let counts = read_counts(&conn).unwrap();
        assert_eq!(counts.schema_version, 0);
        assert_eq!(counts.commands, 1);
        assert_eq!(counts.sessions, 0);
        assert_eq!(counts.last_command.as_deref(), Some("2016-10-01 10:00:00"));
        drop(conn);

        let check = Connection::open(&path).unwrap();
        assert_eq!(schema::stored_version(&check), 0);
        assert!(!schema::table_exists(&check, "sessions").unwrap());
    }

    #[test]
    fn readonly_open_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.db");
        assert!(matches!(open_db_readonly(&path, &settings()), Err(RecentError::Config(_))));
        assert!(!path.exists());
    }

    #[test]
    fn entry_completeness() {
        let full = HistoryEntry {
            timestamp: Some("2024-01-01 00:00:00".into()),
            command: Some("ls".into()),
        };
        assert!(full.is_complete());
        assert!(!HistoryEntry { command: None, ..full.clone() }.is_complete());
        assert!(!HistoryEntry { timestamp: Some(String::new()), ..full }.is_complete());
    }

    #[test]
    fn retry_gives_up_with_busy_after_timeout() {
        let mut calls = 0;
        let started = Instant::now();
        let result: Result<(), RecentError> = with_lock_retry(&settings(), || {
            calls += 1;
            Err(RecentError::Busy)
        });
        assert!(matches!(result, Err(RecentError::Busy)));
        assert!(calls > 1);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let result = with_lock_retry(&settings(), || {
            calls += 1;
            if calls < 3 { Err(RecentError::Busy) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_does_not_repeat_other_errors() {
        let mut calls = 0;
        let result: Result<(), RecentError> = with_lock_retry(&settings(), || {
            calls += 1;
            Err(RecentError::Config("nope".into()))
        });
        assert!(matches!(result, Err(RecentError::Config(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn concurrent_writer_surfaces_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.db");
        let mut holder = Store::new(&path, &settings());
        let _lock = holder.write().unwrap();

        let mut other = Store::new(&path, &settings());
        let err = other.write().map(|_| ()).unwrap_err();
        assert!(err.is_busy());
    }
}
