use crate::cli::LogArgs;
use crate::config::LogConfig;
use crate::env::ShellEnv;
use crate::history::{PROMPT_COMMAND_HOOK, parse_history_line};
use crate::session::{Observation, SessionId, observe};
use crate::store::{NewCommand, Store, append_command, with_lock_retry};
use crate::RecentError;
use regex::Regex;

/// What happened to one hook firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Appended,
    /// Same history line surfaced again for this session.
    Duplicate,
    /// Not appended because of `[log]` settings.
    Skipped,
    /// Store stayed locked or failed; the shell is not told.
    Dropped,
}

pub struct Logger<'a> {
    store: Store,
    env: &'a ShellEnv,
    skip_session_start: bool,
    ignore: Vec<Regex>,
}

impl<'a> Logger<'a> {
    pub fn new(store: Store, env: &'a ShellEnv, config: &LogConfig) -> Result<Self, RecentError> {
        Ok(Self {
            store,
            env,
            skip_session_start: config.skip_session_start,
            ignore: config.ignore_patterns()?,
        })
    }

    fn ignored(&self, command: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(command))
    }

    fn write_event(
        &mut self,
        session: &SessionId,
        sequence: i64,
        command: &str,
        args: &LogArgs,
    ) -> Result<LogOutcome, RecentError> {
        let env = self.env;
        let skip_session_start = self.skip_session_start;
        let ignored = self.ignored(command);

        let tx = self.store.write()?;
        let outcome = match observe(&tx, session, env, sequence)? {
            Observation::Duplicate => LogOutcome::Duplicate,
            Observation::NewSession if skip_session_start => LogOutcome::Skipped,
            _ if ignored => LogOutcome::Skipped,
            Observation::NewSession | Observation::Advanced { .. } => {
                append_command(
                    &tx,
                    &NewCommand {
                        command,
                        pid: args.pid,
                        return_val: args.return_value,
                        pwd: &env.pwd,
                        session: Some(session.as_str()),
                    },
                )?;
                LogOutcome::Appended
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Record one hook firing. Only a malformed history line or a store from
    /// a newer release is reported as an error.
    pub fn log(&mut self, args: &LogArgs) -> Result<LogOutcome, RecentError> {
        let raw = args.command.to_string_lossy();
        let line = parse_history_line(&raw)?;
        let session = SessionId::fingerprint(self.env, args.pid);
        let settings = self.store.settings().clone();

        let result = with_lock_retry(&settings, || {
            self.write_event(&session, line.sequence, &line.command, args)
        });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e @ RecentError::SchemaIncompatible { .. }) => Err(e),
            Err(RecentError::Busy) => {
                log::warn!(
                    "store locked for more than {}ms, dropped history line {}",
                    settings.lock_timeout_ms,
                    line.sequence
                );
                Ok(LogOutcome::Dropped)
            }
            Err(e) => {
                log::warn!("could not record history line {}: {e}", line.sequence);
                Ok(LogOutcome::Dropped)
            }
        }
    }
}

/// Guidance printed when the hook passes something that is not a history line.
pub fn print_hook_guidance() {
    eprintln!("recent: cannot parse command output, please check your bash trigger looks like this:");
    eprintln!("{PROMPT_COMMAND_HOOK}");
}
