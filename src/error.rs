use thiserror::Error;

/// Errors produced while validating a configuration record against the
/// invariants of an [`crate::agreement::Agreement`].
///
/// A validator run never stops at the first problem: all diagnostics found
/// are collected so a single bad record produces one useful error message.
#[derive(Debug, Clone, Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
  pub fn single(message: impl Into<String>) -> Self {
    ValidationError(vec![message.into()])
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Top-level error type for the agreement engine.
///
/// All variants are non-fatal to the process (see spec §7): callers either
/// surface `ConfigInvalid` at creation time, or the engine swallows the
/// error into a status slot and logs it.
#[derive(Debug, Error)]
pub enum AgreementError {
  /// The validator rejected a configuration record outright. The agreement
  /// is not created.
  #[error("invalid agreement configuration: {0}")]
  ConfigInvalid(#[from] ValidationError),

  /// A setter detected a post-hoc invariant violation. The existing agreement
  /// state is left untouched.
  #[error("configuration conflict: {0}")]
  ConfigConflict(String),

  /// LDAP transport or protocol reported BUSY/TRANSIENT/BACKOFF.
  #[error("transient remote error: {0}")]
  TransientRemote(String),

  /// Any other non-zero LDAP or protocol result code.
  #[error("fatal remote error: {0}")]
  FatalRemote(String),

  /// A local directory modify failed while persisting status.
  #[error("directory I/O error: {0}")]
  DirectoryIo(String),

  /// The admin or the protocol reported the suffix or agreement as disabled.
  #[error("replication disabled: {0}")]
  Disabled(String),
}

pub type Result<T> = std::result::Result<T, AgreementError>;
