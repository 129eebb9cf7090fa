//! Self-removing deployment scripts.

use std::fmt;

use chrono::Local;

use crate::transport::ExecOutput;

/// Line the script prints after every change applied.
pub const SUCCESS_MARKER: &str = "SUCCESS";

/// A RouterOS script uploaded to the device and run with `/import`.
///
/// The body is the change set, then a command removing the script file,
/// then `:put SUCCESS`. A run that reaches the end leaves nothing behind; a
/// run that stops early leaves the file in place for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentScript {
    file_name: String,
    body: String,
}

impl DeploymentScript {
    /// Build a script for `changes`, named after the current local time.
    pub fn new(changes: &impl fmt::Display) -> Self {
        let file_name = format!(
            "script-{}.rsc",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
        );
        Self::with_file_name(file_name, changes)
    }

    /// Build a script for `changes` that will be uploaded as `file_name`.
    pub fn with_file_name(file_name: impl Into<String>, changes: &impl fmt::Display) -> Self {
        let file_name = file_name.into();
        let body = format!("{changes}\n/file remove \"{file_name}\"\n:put {SUCCESS_MARKER}");
        Self { file_name, body }
    }

    /// Remote file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Script text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Command that runs the uploaded script.
    pub fn import_command(&self) -> String {
        format!("/import \"{}\"", self.file_name)
    }

    /// Whether `output` of the import shows the script ran to the end.
    ///
    /// Only stdout is consulted. RouterOS does not report script errors
    /// through the exit status or stderr of `/import`.
    pub fn completed(output: &ExecOutput) -> bool {
        output.stdout_contains(SUCCESS_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout() {
        let script = DeploymentScript::with_file_name(
            "script-2024-05-01T10:00:00.000001.rsc",
            &"/system identity\nset name=router1",
        );

        assert_eq!(
            script.body(),
            "/system identity\nset name=router1\n\
             /file remove \"script-2024-05-01T10:00:00.000001.rsc\"\n\
             :put SUCCESS"
        );
        assert_eq!(
            script.import_command(),
            "/import \"script-2024-05-01T10:00:00.000001.rsc\""
        );
    }

    #[test]
    fn test_time_derived_name() {
        let script = DeploymentScript::new(&"");
        let name = script.file_name();

        assert!(name.starts_with("script-"), "{name}");
        assert!(name.ends_with(".rsc"), "{name}");
        // script-YYYY-MM-DDTHH:MM:SS.ffffff.rsc
        assert_eq!(name.len(), "script-".len() + 26 + ".rsc".len(), "{name}");
        assert_eq!(&name[17..18], "T");
    }

    #[test]
    fn test_completion_ignores_exit_status() {
        let done = ExecOutput::new("Script file loaded and executed successfully\r\nSUCCESS\r\n", "", None);
        assert!(DeploymentScript::completed(&done));

        let stopped = ExecOutput::new("failure: item not found\r\n", "", Some(0));
        assert!(!DeploymentScript::completed(&stopped));

        let marker_on_stderr = ExecOutput::new("", "SUCCESS", Some(0));
        assert!(!DeploymentScript::completed(&marker_on_stderr));
    }
}
