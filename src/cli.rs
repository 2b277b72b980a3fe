use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recent", version, about = "Log bash history to an SQLite database and query it")]
pub struct Cli {
    /// Database path
    #[arg(long, env = "RECENT_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record the last history line (run from PROMPT_COMMAND)
    Log(LogArgs),
    /// Show recent commands, oldest first
    Query(QueryArgs),
    /// Show database health: size, schema version, counts
    Status,
    /// Print the bash hook to add to ~/.bashrc
    Init,
}

#[derive(Parser)]
pub struct LogArgs {
    /// Exit status of the command, set to $?
    #[arg(short = 'r', long, alias = "return_value", default_value_t = 0, allow_negative_numbers = true)]
    pub return_value: i64,

    /// History line, set to "$(HISTTIMEFORMAT= history 1)". Bytes that are
    /// not UTF-8 are accepted and replaced when recorded.
    #[arg(
        short = 'c',
        long,
        default_value = "",
        allow_hyphen_values = true,
        value_parser = clap::value_parser!(OsString)
    )]
    pub command: OsString,

    /// Shell pid, set to $$
    #[arg(short = 'p', long, default_value_t = 0)]
    pub pid: i64,
}

#[derive(Parser)]
pub struct QueryArgs {
    /// Optional substring to search for in commands
    pub pattern: Option<String>,

    /// Maximum results (default 20)
    #[arg(short = 'n', value_name = "20", allow_hyphen_values = true)]
    pub limit: Option<String>,

    /// Only commands run in this working directory
    #[arg(short = 'w', value_name = "/folder")]
    pub directory: Option<String>,

    /// Date in YYYY-MM-DD, YYYY-MM, or YYYY format
    #[arg(short = 'd', value_name = "2016-10-01")]
    pub date: Option<String>,

    /// Print commands without their timestamps
    #[arg(long, alias = "hide_time")]
    pub hide_time: bool,

    /// Print one JSON object per line
    #[arg(long, conflicts_with = "hide_time")]
    pub json: bool,
}
