//! Session fingerprints and sequence-based duplicate detection.
//!
//! A shell hook fires once per prompt, so the same history line can surface
//! more than once: carriage returns on an empty prompt, several hooks chained
//! into `PROMPT_COMMAND`, or panes sharing one history file. Each shell
//! session is identified by a fingerprint of its terminal environment and the
//! shell's pid, and the last history sequence number seen for it is kept. A
//! repeat of that number is the same command surfacing again.

use crate::env::ShellEnv;
use crate::store::{SessionRecord, find_session, insert_session, update_session};
use crate::RecentError;
use rusqlite::Connection;
use sha2::{Digest, Sha256};

/// Content-addressed session identifier: 128 bits of SHA-256, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Precondition: the hook passes the pid of the interactive shell (`$$`),
    /// which stays fixed for the session's lifetime.
    pub fn fingerprint(env: &ShellEnv, pid: i64) -> Self {
        let seed = format!(
            "{}-{}-{}-{}-{}-{}-{}",
            env.term_session_id, env.window_id, env.shlvl, env.tmux, env.tmux_pane, env.sty, pid
        );
        let digest = Sha256::digest(seed.as_bytes());
        SessionId(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How one hook firing relates to what the store already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time this fingerprint is seen.
    NewSession,
    /// Known session, new history line.
    Advanced { previous: i64 },
    /// Known session, same sequence as last time.
    Duplicate,
}

impl Observation {
    pub fn is_duplicate(self) -> bool {
        matches!(self, Observation::Duplicate)
    }
}

/// Record that `session` has reached `sequence` and classify the event.
///
/// Runs inside the caller's transaction so the session update and any
/// command append commit together. The session row is refreshed even for
/// duplicates.
pub fn observe(
    conn: &Connection,
    session: &SessionId,
    env: &ShellEnv,
    sequence: i64,
) -> Result<Observation, RecentError> {
    let observation = match find_session(conn, session.as_str())? {
        None => {
            insert_session(
                conn,
                &SessionRecord {
                    session: session.as_str().to_string(),
                    term: env.term.clone(),
                    hostname: env.hostname.clone(),
                    user: env.user.clone(),
                    sequence,
                },
            )?;
            return Ok(Observation::NewSession);
        }
        Some(stored) if stored == sequence => Observation::Duplicate,
        Some(stored) => Observation::Advanced { previous: stored },
    };

    update_session(conn, session.as_str(), sequence)?;
    log::debug!("session {session} at sequence {sequence}: {observation:?}");
    Ok(observation)
}
