pub mod cli;
pub mod config;
pub mod env;
pub mod history;
pub mod query;
pub mod record;
pub mod schema;
pub mod search;
pub mod session;
pub mod status;
pub mod store;

#[derive(Debug)]
pub enum RecentError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
    /// History line did not look like `  <seq>  <command>`.
    Parse(String),
    /// Bad query filter input, raised before the store is opened.
    Validation(String),
    /// On-disk schema was written by a newer release.
    SchemaIncompatible { found: usize, supported: usize },
    /// Write lock could not be acquired in time.
    Busy,
}

impl std::fmt::Display for RecentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecentError::Database(e) => write!(f, "database: {e}"),
            RecentError::Io(e) => write!(f, "io: {e}"),
            RecentError::Json(e) => write!(f, "json: {e}"),
            RecentError::Config(msg) => write!(f, "config: {msg}"),
            RecentError::Parse(msg) => write!(f, "parse: {msg}"),
            RecentError::Validation(msg) => write!(f, "{msg}"),
            RecentError::SchemaIncompatible { found, supported } => write!(
                f,
                "your command history database is at schema version {found} but this release \
                 supports up to {supported}, please update recent"
            ),
            RecentError::Busy => write!(f, "database is locked by another process"),
        }
    }
}

impl std::error::Error for RecentError {}

impl From<rusqlite::Error> for RecentError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                RecentError::Busy
            }
            _ => RecentError::Database(e),
        }
    }
}

impl From<std::io::Error> for RecentError {
    fn from(e: std::io::Error) -> Self {
        RecentError::Io(e)
    }
}

impl From<serde_json::Error> for RecentError {
    fn from(e: serde_json::Error) -> Self {
        RecentError::Json(e)
    }
}

impl From<rusqlite_migration::Error> for RecentError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => RecentError::from(err),
            other => RecentError::Config(format!("migration: {other}")),
        }
    }
}

impl RecentError {
    pub fn is_busy(&self) -> bool {
        matches!(self, RecentError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_sqlite_errors_classify_as_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(RecentError::from(err).is_busy());

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(RecentError::from(err).is_busy());
    }

    #[test]
    fn other_sqlite_errors_stay_database() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(RecentError::from(err), RecentError::Database(_)));
    }

    #[test]
    fn schema_incompatible_message_names_versions() {
        let msg = RecentError::SchemaIncompatible { found: 3, supported: 1 }.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("up to 1"));
    }
}
