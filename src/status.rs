use crate::config::StoreConfig;
use crate::schema::{SCHEMA_VERSION, stored_version};
use crate::store::{open_db_readonly, read_counts};
use crate::RecentError;
use std::path::Path;

pub fn handle_status(db_path: &Path, settings: &StoreConfig) -> Result<(), RecentError> {
    if !db_path.exists() {
        eprintln!("recent: no database at {}", db_path.display());
        return Ok(());
    }

    let db_size = std::fs::metadata(db_path)?.len();
    let wal_path = wal_path(db_path);
    let wal_size = std::fs::metadata(&wal_path).map(|m| m.len()).ok();

    let conn = open_db_readonly(db_path, settings)?;
    let version = stored_version(&conn);

    eprintln!("recent: database — {}", db_path.display());
    match wal_size {
        Some(ws) => eprintln!("recent: size — {} (+{} WAL)", fmt_size(db_size), fmt_size(ws)),
        None => eprintln!("recent: size — {}", fmt_size(db_size)),
    }
    eprintln!("recent: schema — version {version} (supported {SCHEMA_VERSION})");
    if version > SCHEMA_VERSION {
        eprintln!("recent: written by a newer release, please update recent");
        return Ok(());
    }
    if version < SCHEMA_VERSION {
        eprintln!("recent: schema will be upgraded on the next log or query");
    }

    let counts = read_counts(&conn)?;
    eprintln!("recent: commands — {}", counts.commands);
    eprintln!("recent: sessions — {}", counts.sessions);
    if let Some(ts) = counts.last_command {
        eprintln!("recent: last command — {ts}");
    }

    Ok(())
}

fn wal_path(db_path: &Path) -> std::path::PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push("-wal");
    name.into()
}

fn fmt_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
