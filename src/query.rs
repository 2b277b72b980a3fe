use crate::RecentError;
use regex::Regex;
use rusqlite::types::Value;
use std::sync::LazyLock;

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static YEAR_MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").unwrap());
static DAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Search constraints as given by the user. Empty strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Substring of the command text.
    pub pattern: Option<String>,
    /// Absolute working directory, already tilde- and symlink-resolved.
    pub directory: Option<String>,
    /// `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, or a raw timestamp.
    pub date: Option<String>,
    /// Maximum rows, unparsed.
    pub limit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateGranularity {
    Year,
    Month,
    Day,
    /// Compared against the stored timestamp verbatim.
    Exact,
}

impl DateGranularity {
    pub fn of(raw: &str) -> Self {
        if YEAR.is_match(raw) {
            DateGranularity::Year
        } else if YEAR_MONTH.is_match(raw) {
            DateGranularity::Month
        } else if DAY.is_match(raw) {
            DateGranularity::Day
        } else {
            DateGranularity::Exact
        }
    }

    fn predicate(self) -> &'static str {
        match self {
            DateGranularity::Year => "strftime('%Y', command_dt) = ?",
            DateGranularity::Month => "strftime('%Y-%m', command_dt) = ?",
            DateGranularity::Day => "date(command_dt) = ?",
            DateGranularity::Exact => "command_dt = ?",
        }
    }
}

/// SQL text plus positional parameters, in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Escape LIKE metacharacters so the pattern matches literally.
fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('%');
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

pub fn parse_limit(raw: &str) -> Result<i64, RecentError> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(n) => Err(RecentError::Validation(format!(
            "-n must be a positive integer, got {n}"
        ))),
        Err(_) => Err(RecentError::Validation(format!(
            "-n must be an integer, got {raw:?}"
        ))),
    }
}

fn present(opt: &Option<String>) -> Option<&str> {
    opt.as_deref().filter(|s| !s.is_empty())
}

impl QueryFilters {
    /// Compose the most recent `limit` matching rows, oldest first.
    pub fn build(&self) -> Result<HistoryQuery, RecentError> {
        let limit = parse_limit(&self.limit)?;

        let mut predicates: Vec<&'static str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(pattern) = present(&self.pattern) {
            predicates.push(r"command LIKE ? ESCAPE '\'");
            params.push(Value::Text(escape_like(pattern)));
        }
        if let Some(dir) = present(&self.directory) {
            predicates.push("pwd = ?");
            params.push(Value::Text(dir.to_string()));
        }
        if let Some(date) = present(&self.date) {
            predicates.push(DateGranularity::of(date).predicate());
            params.push(Value::Text(date.to_string()));
        }
        params.push(Value::Integer(limit));

        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", predicates.join(" AND "))
        };

        let sql = format!(
            "SELECT command_dt, command FROM (
    SELECT rowid AS id, command_dt, command FROM commands
    {where_clause}
    ORDER BY command_dt DESC, rowid DESC
    LIMIT ?
) ORDER BY command_dt, id"
        );

        Ok(HistoryQuery { sql, params })
    }
}
