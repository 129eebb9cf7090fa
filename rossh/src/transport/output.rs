//! Captured result of a remote command.

use bytes::Bytes;
use memchr::memmem;

/// Output of one remote command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Everything the command wrote to standard output.
    pub stdout: Bytes,

    /// Everything the command wrote to standard error.
    pub stderr: Bytes,

    /// Exit status, if the server reported one.
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Create an output record.
    pub fn new(stdout: impl Into<Bytes>, stderr: impl Into<Bytes>, exit_status: Option<u32>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    /// Whether the server reported a zero exit status.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Whether standard output contains `needle` anywhere.
    pub fn stdout_contains(&self, needle: &str) -> bool {
        memmem::find(&self.stdout, needle.as_bytes()).is_some()
    }

    /// Standard output as text (lossy UTF-8 conversion).
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text (lossy UTF-8 conversion).
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Trimmed standard output lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout_lossy()
            .lines()
            .map(|line| line.trim().to_string())
            .collect()
    }

    /// Error detail for a failed command: stderr, or stdout when stderr is empty.
    pub fn error_text(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout_lossy()
        } else {
            self.stderr_lossy()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_reported_zero() {
        assert!(ExecOutput::new("", "", Some(0)).success());
        assert!(!ExecOutput::new("", "", Some(1)).success());
        assert!(!ExecOutput::new("", "", None).success());
    }

    #[test]
    fn test_stdout_contains() {
        let output = ExecOutput::new("Script file loaded\r\nSUCCESS\r\n", "", None);
        assert!(output.stdout_contains("SUCCESS"));
        assert!(!output.stdout_contains("FAILURE"));
    }

    #[test]
    fn test_lines_are_trimmed() {
        let output = ExecOutput::new("  first \r\nsecond\n", "", Some(0));
        assert_eq!(output.lines(), vec!["first", "second"]);
    }

    #[test]
    fn test_error_text_prefers_stderr() {
        assert_eq!(ExecOutput::new("out", "err", Some(1)).error_text(), "err");
        assert_eq!(ExecOutput::new("out", "", Some(1)).error_text(), "out");
    }
}
