use crate::RecentError;
use regex::Regex;
use std::sync::LazyLock;

/// `history 1` output: leading blanks, sequence number, optional `*` for an
/// edited entry, blanks, then the command (which may span lines).
static HISTORY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s+(\d+)\*?\s+(.*)$").unwrap());

/// The bash hook `recent init` prints and parse errors point to.
pub const PROMPT_COMMAND_HOOK: &str =
    r#"export PROMPT_COMMAND='recent log -r $? -c "$(HISTTIMEFORMAT= history 1)" -p $$'"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub sequence: i64,
    pub command: String,
}

pub fn parse_history_line(raw: &str) -> Result<HistoryLine, RecentError> {
    let caps = HISTORY_LINE
        .captures(raw)
        .ok_or_else(|| RecentError::Parse(format!("unrecognised history line {raw:?}")))?;

    let sequence = caps[1]
        .parse::<i64>()
        .map_err(|e| RecentError::Parse(format!("history sequence {:?}: {e}", &caps[1])))?;

    Ok(HistoryLine {
        sequence,
        command: caps[2].to_string(),
    })
}
