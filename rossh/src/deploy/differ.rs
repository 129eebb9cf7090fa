//! Configuration diff collaborator.

use std::fmt;

/// Sections that differ between a desired and a current configuration.
///
/// The `Display` form is the literal RouterOS script that moves the device
/// from the current to the desired configuration.
pub trait ChangeSet: fmt::Display + Send {
    /// Whether applying this change set would be a no-op.
    fn is_empty(&self) -> bool;
}

/// Parses configuration exports and diffs them.
///
/// The deployer only needs `parse` and `diff`; how documents are modelled
/// and compared is up to the implementation.
pub trait ConfigDiffer: Send + Sync {
    /// A parsed configuration.
    type Document;

    /// Result of a diff.
    type Changes: ChangeSet;

    /// Parse failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Parse an `/export` style configuration text.
    fn parse(&self, text: &str) -> Result<Self::Document, Self::Error>;

    /// Compute what must change on a device running `base` for it to run
    /// `desired`.
    ///
    /// `base_verbose` is the same configuration exported with defaults
    /// included, when the caller has it.
    fn diff(
        &self,
        desired: &Self::Document,
        base: &Self::Document,
        base_verbose: Option<&Self::Document>,
    ) -> Self::Changes;
}
