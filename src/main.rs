use clap::Parser;
use recent::cli::{Cli, Command, LogArgs};
use recent::config::{RecentConfig, load_config};
use recent::env::ShellEnv;
use recent::history::PROMPT_COMMAND_HOOK;
use recent::record::{Logger, print_hook_guidance};
use recent::search::handle_query;
use recent::status::handle_status;
use recent::store::Store;
use recent::RecentError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".recent.db")
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RECENT_LOG", "warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Hook path: never fails the user's prompt except for a broken hook line or
/// a database written by a newer release.
fn run_log(db_path: &Path, args: &LogArgs) -> ExitCode {
    let config = load_config().unwrap_or_else(|e| {
        log::warn!("{e}, using defaults");
        RecentConfig::default()
    });
    let env = ShellEnv::from_process();
    let store = Store::new(db_path, &config.store);

    let result = Logger::new(store, &env, &config.log).and_then(|mut logger| logger.log(args));
    match result {
        Ok(outcome) => {
            log::debug!("{outcome:?}");
            ExitCode::SUCCESS
        }
        Err(RecentError::Parse(msg)) => {
            log::debug!("{msg}");
            print_hook_guidance();
            ExitCode::from(1)
        }
        Err(e @ RecentError::SchemaIncompatible { .. }) => {
            eprintln!("recent: {e}");
            ExitCode::from(1)
        }
        Err(e) => {
            log::warn!("{e}");
            ExitCode::SUCCESS
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(default_db_path);

    let result = match cli.command {
        Command::Log(args) => return run_log(&db_path, &args),
        Command::Query(args) => load_config().and_then(|config| handle_query(&db_path, &args, &config)),
        Command::Status => load_config().and_then(|config| handle_status(&db_path, &config.store)),
        Command::Init => {
            println!("{PROMPT_COMMAND_HOOK}");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("recent: {e}");
            ExitCode::from(1)
        }
    }
}
