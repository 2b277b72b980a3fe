/// Snapshot of the process environment a log event depends on.
///
/// Captured once in `main` and passed down, so fingerprinting and
/// deduplication never read the environment themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellEnv {
    /// macOS Terminal / iTerm tab id.
    pub term_session_id: String,
    /// X11 window of the terminal emulator.
    pub window_id: String,
    /// Shell nesting depth.
    pub shlvl: String,
    /// tmux server socket and session.
    pub tmux: String,
    pub tmux_pane: String,
    /// GNU screen session.
    pub sty: String,
    pub term: String,
    pub hostname: String,
    pub user: String,
    /// Working directory with symlinks resolved, so it compares equal to
    /// `query -w` paths.
    pub pwd: String,
}

fn var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

/// Resolve symlinks in the shell's `$PWD`; a directory that has since gone
/// away is kept as reported.
pub fn resolve_pwd(pwd: &str) -> String {
    if pwd.is_empty() {
        return String::new();
    }
    std::fs::canonicalize(pwd)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| pwd.to_string())
}

impl ShellEnv {
    pub fn from_process() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| whoami::username());
        let hostname = whoami::fallible::hostname().unwrap_or_default();
        let pwd = std::env::var_os("PWD")
            .map(|p| resolve_pwd(&p.to_string_lossy()))
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        Self {
            term_session_id: var("TERM_SESSION_ID"),
            window_id: var("WINDOWID"),
            shlvl: var("SHLVL"),
            tmux: var("TMUX"),
            tmux_pane: var("TMUX_PANE"),
            sty: var("STY"),
            term: var("TERM"),
            hostname,
            user,
            pwd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_kept_verbatim() {
        assert_eq!(resolve_pwd("/nonexistent/recent/dir"), "/nonexistent/recent/dir");
        assert_eq!(resolve_pwd(""), "");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_pwd_resolves_to_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(
            resolve_pwd(link.to_str().unwrap()),
            std::fs::canonicalize(&real).unwrap().to_string_lossy()
        );
    }
}
