//! Child-process helpers shared by both backends.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `-1` if the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `command` to completion with captured output.
pub async fn capture(mut command: Command) -> std::io::Result<CommandOutput> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Build `sh -c <script>` running in `cwd`.
pub fn sh(script: &str, cwd: &Path) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script).current_dir(cwd);
    command
}

/// Quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_leaves_safe_words_alone() {
        assert_eq!(quote("/srv/build-1"), "/srv/build-1");
        assert_eq!(quote("a.tar.gz"), "a.tar.gz");
    }

    #[test]
    fn test_quote_wraps_unsafe_strings() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("dist/*.js"), "'dist/*.js'");
        assert_eq!(quote("my dir"), "'my dir'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "out\n".into(),
            stderr: " err \n".into(),
        };
        assert_eq!(out.diagnostic(), "err");
        let out = CommandOutput {
            stderr: String::new(),
            ..out
        };
        assert_eq!(out.diagnostic(), "out");
    }

    #[tokio::test]
    async fn test_capture_reports_exit_code_and_streams() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = capture(sh("echo hello; echo oops >&2; exit 3", dir.path()))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }
}
