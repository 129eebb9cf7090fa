//! Script-based configuration deployment.
//!
//! [`ConfigDeployer`] moves a RouterOS device to a desired configuration:
//!
//! 1. export the running configuration (unless the caller supplies it)
//! 2. diff desired against current with a [`ConfigDiffer`]
//! 3. upload the change set as a self-removing script over SFTP
//! 4. run it with `/import`
//! 5. look for the success marker in the output
//!
//! An empty diff stops after step 2 without touching the device. A script
//! that does not print the marker is left on the device and reported with
//! [`DeployError::VerificationFailed`]. Nothing is retried or rolled back.
//!
//! # Example
//!
//! ```rust,no_run
//! use rossh::deploy::{ConfigDeployer, ConfigDiffer, DeployRequest};
//! use rossh::SessionBuilder;
//!
//! # async fn example<D: ConfigDiffer>(differ: D) -> Result<(), rossh::Error> {
//! let session = SessionBuilder::new("192.168.88.1")
//!     .username("admin")
//!     .password("secret")
//!     .host_key("ecdsa-sha2-nistp256 AAAAE2VjZHNh...")
//!     .build()?;
//!
//! let mut deployer = ConfigDeployer::new(session, differ);
//! let outcome = deployer.deploy(DeployRequest::from_file("router1.rsc")).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod differ;
mod script;

pub use differ::{ChangeSet, ConfigDiffer};
pub use script::{DeploymentScript, SUCCESS_MARKER};

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::error::{DeployError, Result, SessionError};
use crate::session::{SessionGuard, SshSession};
use crate::transport::{Connector, SshConnector};

/// Where a deployment currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployState {
    /// No deployment started yet.
    Idle,
    /// Reading the running configuration.
    FetchingCurrent,
    /// Comparing desired and current configuration.
    Diffing,
    /// Nothing to change; the device was left alone.
    NoOpDone,
    /// Writing the script to the device.
    Uploading,
    /// Running the uploaded script.
    Executing,
    /// Checking the script output for the success marker.
    Verifying,
    /// The script ran to the end and removed itself.
    Cleaned,
    /// The deployment stopped with an error.
    Failed {
        /// The error, as displayed.
        reason: String,
        /// Whether the script may still be on the device, possibly partially
        /// written when the upload itself failed.
        artifact_left_behind: bool,
    },
}

/// Desired configuration source.
#[derive(Debug, Clone)]
pub enum DesiredConfig {
    /// Read from a local file.
    File(PathBuf),
    /// Given inline.
    Text(String),
}

impl DesiredConfig {
    async fn load(self) -> Result<String> {
        match self {
            DesiredConfig::File(path) => match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(text),
                Err(source) => Err(DeployError::ReadDesired { path, source }.into()),
            },
            DesiredConfig::Text(text) => Ok(text),
        }
    }
}

/// One deployment request.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    desired: DesiredConfig,
    current: Option<String>,
    current_verbose: Option<String>,
}

impl DeployRequest {
    /// Deploy `desired`, exporting the current configuration from the device.
    pub fn new(desired: DesiredConfig) -> Self {
        Self {
            desired,
            current: None,
            current_verbose: None,
        }
    }

    /// Deploy the configuration in the file at `path`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(DesiredConfig::File(path.into()))
    }

    /// Deploy the configuration `text`.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(DesiredConfig::Text(text.into()))
    }

    /// Use `text` as the current configuration instead of exporting it.
    pub fn current(mut self, text: impl Into<String>) -> Self {
        self.current = Some(text.into());
        self
    }

    /// Also diff against `text`, the current configuration with defaults
    /// (`/export verbose`).
    pub fn current_verbose(mut self, text: impl Into<String>) -> Self {
        self.current_verbose = Some(text.into());
        self
    }
}

/// How a successful deployment ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Desired and current configuration already matched.
    NoChanges,
    /// The script ran to completion and removed itself.
    Applied {
        /// Name the script was uploaded under.
        file_name: String,
    },
}

/// Applies configuration to one device through an [`SshSession`].
pub struct ConfigDeployer<D: ConfigDiffer, C: Connector = SshConnector> {
    session: SshSession<C>,
    differ: D,
    state: DeployState,
    // Set once the script write starts; a failed write may leave a partial file
    upload_started: bool,
}

impl<D: ConfigDiffer, C: Connector> ConfigDeployer<D, C> {
    /// Create a deployer over `session`.
    ///
    /// The session may be closed; each step acquires and releases it.
    pub fn new(session: SshSession<C>, differ: D) -> Self {
        Self {
            session,
            differ,
            state: DeployState::Idle,
            upload_started: false,
        }
    }

    /// State of the last (or running) deployment.
    pub fn state(&self) -> &DeployState {
        &self.state
    }

    /// The underlying session.
    pub fn session(&self) -> &SshSession<C> {
        &self.session
    }

    /// Mutable access to the underlying session.
    pub fn session_mut(&mut self) -> &mut SshSession<C> {
        &mut self.session
    }

    /// Take back the session.
    pub fn into_session(self) -> SshSession<C> {
        self.session
    }

    /// Export the running configuration.
    ///
    /// With `verbose`, defaults are included (`/export verbose`).
    pub async fn running_config(&mut self, verbose: bool) -> Result<String> {
        let command = if verbose { "/export verbose" } else { "/export" };

        let mut guard = self.session.enter().await?;
        let result = export(&mut guard, command).await;
        finish(guard, result).await
    }

    /// Bring the device to the requested configuration.
    pub async fn deploy(&mut self, request: DeployRequest) -> Result<DeployOutcome> {
        let host = self.session.host().to_string();
        self.state = DeployState::Idle;
        self.upload_started = false;

        let result = self.run_deploy(&host, request).await;

        if let Err(e) = &result {
            let artifact_left_behind = match self.state {
                DeployState::Uploading => self.upload_started,
                DeployState::Executing | DeployState::Verifying => true,
                _ => false,
            };
            advance(
                &mut self.state,
                &host,
                DeployState::Failed {
                    reason: e.to_string(),
                    artifact_left_behind,
                },
            );
        }
        result
    }

    async fn run_deploy(&mut self, host: &str, request: DeployRequest) -> Result<DeployOutcome> {
        let DeployRequest {
            desired,
            current,
            current_verbose,
        } = request;
        let desired = desired.load().await?;

        advance(&mut self.state, host, DeployState::FetchingCurrent);
        let current = match current {
            Some(text) => text,
            None => self.running_config(false).await?,
        };

        advance(&mut self.state, host, DeployState::Diffing);
        let changes = self.changes(&desired, &current, current_verbose.as_deref())?;
        if changes.is_empty() {
            info!("{}: configuration already up to date", host);
            advance(&mut self.state, host, DeployState::NoOpDone);
            return Ok(DeployOutcome::NoChanges);
        }

        let script = DeploymentScript::new(&changes);

        advance(&mut self.state, host, DeployState::Uploading);
        let mut guard = self.session.enter().await?;
        let result = apply(
            &mut guard,
            &mut self.state,
            &mut self.upload_started,
            host,
            &script,
        )
        .await;
        let file_name = finish(guard, result).await?;

        info!("{}: applied configuration via {}", host, file_name);
        Ok(DeployOutcome::Applied { file_name })
    }

    fn changes(
        &self,
        desired: &str,
        current: &str,
        current_verbose: Option<&str>,
    ) -> Result<D::Changes> {
        let desired = self.parse(desired)?;
        let current = self.parse(current)?;
        let current_verbose = current_verbose.map(|text| self.parse(text)).transpose()?;
        Ok(self
            .differ
            .diff(&desired, &current, current_verbose.as_ref()))
    }

    fn parse(&self, text: &str) -> Result<D::Document> {
        self.differ
            .parse(text)
            .map_err(|e| DeployError::Parse(Box::new(e)).into())
    }
}

fn advance(state: &mut DeployState, host: &str, next: DeployState) {
    debug!("{}: deploy {:?} -> {:?}", host, state, next);
    *state = next;
}

async fn export<C: Connector>(session: &mut SshSession<C>, command: &str) -> Result<String> {
    let output = session.execute(command).await?;
    if !output.success() {
        return Err(SessionError::CommandFailed {
            command: command.to_string(),
            message: output.error_text().chars().take(150).collect(),
        }
        .into());
    }
    Ok(output.stdout_lossy())
}

/// Upload, run and verify `script`; returns the uploaded file name.
async fn apply<C: Connector>(
    session: &mut SshSession<C>,
    state: &mut DeployState,
    upload_started: &mut bool,
    host: &str,
    script: &DeploymentScript,
) -> Result<String> {
    debug!(
        "{}: uploading {} ({} bytes)",
        host,
        script.file_name(),
        script.body().len()
    );
    *upload_started = true;
    session
        .write_file(script.file_name(), script.body().as_bytes())
        .await?;

    advance(state, host, DeployState::Executing);
    let output = session.execute(&script.import_command()).await?;

    advance(state, host, DeployState::Verifying);
    debug!(
        "{}: import finished with exit status {:?}",
        host, output.exit_status
    );
    if !DeploymentScript::completed(&output) {
        warn!(
            "{}: script {} did not report success, leaving it on the device",
            host,
            script.file_name()
        );
        return Err(DeployError::VerificationFailed {
            host: host.to_string(),
            file_name: script.file_name().to_string(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        }
        .into());
    }

    advance(state, host, DeployState::Cleaned);
    Ok(script.file_name().to_string())
}

/// Exit `guard`, keeping the outcome of the work done under it.
///
/// A failed release is logged; it never replaces `result`.
async fn finish<T, C: Connector>(guard: SessionGuard<'_, C>, result: Result<T>) -> Result<T> {
    let host = guard.host().to_string();
    if let Err(e) = guard.exit().await {
        warn!("{}: error while releasing session: {}", host, e);
    }
    result
}
