use crate::cli::QueryArgs;
use crate::config::{QueryConfig, RecentConfig};
use crate::query::QueryFilters;
use crate::store::{Store, with_lock_retry};
use crate::RecentError;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Timestamped,
    CommandOnly,
    Json,
}

impl OutputFormat {
    pub fn from_args(args: &QueryArgs, config: &QueryConfig) -> Self {
        if args.json {
            OutputFormat::Json
        } else if args.hide_time || config.hide_time {
            OutputFormat::CommandOnly
        } else {
            OutputFormat::Timestamped
        }
    }
}

/// Expand `~`, anchor relative paths at `cwd`, then resolve symlinks. Paths
/// that do not exist are normalized lexically instead.
pub fn resolve_directory(raw: &str, home: Option<&Path>, cwd: &Path) -> String {
    let expanded = match (raw.strip_prefix('~'), home) {
        (Some(""), Some(h)) => h.to_path_buf(),
        (Some(rest), Some(h)) if rest.starts_with('/') => h.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(raw),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    let resolved = std::fs::canonicalize(&absolute).unwrap_or_else(|_| normalize(&absolute));
    resolved.to_string_lossy().into_owned()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

pub fn filters_from_args(args: &QueryArgs, config: &QueryConfig) -> Result<QueryFilters, RecentError> {
    let directory = match args.directory.as_deref() {
        Some(raw) if !raw.is_empty() => {
            let home = std::env::var_os("HOME").map(PathBuf::from);
            let cwd = std::env::current_dir()?;
            Some(resolve_directory(raw, home.as_deref(), &cwd))
        }
        _ => None,
    };

    Ok(QueryFilters {
        pattern: args.pattern.clone(),
        directory,
        date: args.date.clone(),
        limit: args
            .limit
            .clone()
            .unwrap_or_else(|| config.default_limit.to_string()),
    })
}

/// Run `filters` and stream matching rows to `out`. Returns rows printed.
pub fn search<W: Write>(
    store: &mut Store,
    filters: &QueryFilters,
    format: OutputFormat,
    out: &mut W,
) -> Result<usize, RecentError> {
    // Validates the limit before the store is opened.
    let query = filters.build()?;

    // Opening may migrate, which needs the write lock. Retry only up to here
    // so no row is printed twice.
    let settings = store.settings().clone();
    with_lock_retry(&settings, || store.connect())?;

    let mut cursor = store.cursor(&query)?;
    let mut printed = 0;
    for entry in cursor.rows()? {
        let entry = entry?;
        if !entry.is_complete() {
            continue;
        }
        let (ts, cmd) = (
            entry.timestamp.as_deref().unwrap_or_default(),
            entry.command.as_deref().unwrap_or_default(),
        );
        match format {
            OutputFormat::Timestamped => writeln!(out, "{ts} {cmd}")?,
            OutputFormat::CommandOnly => writeln!(out, "{cmd}")?,
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&entry)?)?,
        }
        printed += 1;
    }
    log::debug!("{printed} rows");
    Ok(printed)
}

pub fn handle_query(db_path: &Path, args: &QueryArgs, config: &RecentConfig) -> Result<(), RecentError> {
    let filters = filters_from_args(args, &config.query)?;
    // Fail fast on a bad -n before the database file is created or migrated.
    filters.build()?;

    let mut store = Store::new(db_path, &config.store);
    let format = OutputFormat::from_args(args, &config.query);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    search(&mut store, &filters, format, &mut out)?;
    Ok(())
}
