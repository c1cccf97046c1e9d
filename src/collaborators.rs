//! Interfaces to the subsystems this engine treats as external collaborators
//! (spec §1): the wire protocol worker, the directory backend, the schedule
//! calendar and the consumer RUV. Only their shapes are defined here, none
//! of their internals are implemented by this crate.
//!
//! Modelled on the teacher's `StatusEvented` trait boundary
//! (`dds/statusevents.rs`): a thin trait around a mechanism that lives
//! outside this module, with callbacks kept as plain closures rather than
//! reentrant dispatch so no collaborator can call back into an agreement's
//! own mutex (spec §9).

use std::sync::{Arc, RwLock};

use crate::model::{AgreementId, BackendFlavor, Change};

/// A running wire-protocol worker bound to one agreement.
///
/// The real implementation owns exactly one worker thread per started
/// agreement (spec §5). This crate only needs to start it, notify it of
/// configuration changes and stop it.
pub trait Protocol: Send + Sync {
  /// Informs the worker that some piece of the agreement's configuration
  /// changed. Never blocks for long; the worker applies the change at its
  /// own next opportunity.
  fn notify_config_changed(&self);

  /// Hands a qualifying local-write change to the worker for replication.
  fn notify_change(&self, change: &Change);

  /// Cooperatively stops the worker and blocks until it acknowledges.
  /// Idempotent.
  fn stop(&self);
}

/// Creates [`Protocol`] workers. Kept as a trait so tests can substitute a
/// fake without spinning up real network I/O.
pub trait ProtocolFactory: Send + Sync {
  /// Spawns a new worker for `agreement_id`, starting in `total` state if
  /// `total_init` is true, otherwise in `incremental` state (spec §4.5).
  fn spawn(&self, agreement_id: &AgreementId, total_init: bool) -> Arc<dyn Protocol>;
}

/// One entry read back from the replicated subtree's tombstone entry
/// (spec §6): an `agmt-maxcsn` value together with whatever other state the
/// Directory collaborator chooses to expose.
#[derive(Debug, Clone)]
pub struct TombstoneEntry {
  pub agmt_maxcsn_values: Vec<String>,
}

/// The local directory backend and its search/modify path (spec §1). All
/// operations may block (spec §5) and must never be called while holding an
/// agreement's mutex (spec §5 lock ordering).
pub trait Directory: Send + Sync {
  /// Which backend flavor hosts `subtree`, used to pick flow-control
  /// defaults (spec §4.2).
  fn backend_flavor(&self, subtree: &str) -> BackendFlavor;

  /// The process-wide default fractional-attribute list, read from a
  /// well-known configuration entry (spec §4.2).
  fn default_fractional_attrs(&self) -> Vec<String>;

  /// Reads the tombstone entry for `subtree`.
  fn read_tombstone(&self, subtree: &str) -> TombstoneEntry;

  /// Rewrites the tombstone entry for `subtree`, replacing the full set of
  /// `agmt-maxcsn` values.
  fn write_tombstone_maxcsn(&self, subtree: &str, agmt_maxcsn_values: Vec<String>);

  /// Persists `last-init-*` / `last-update-*` attributes back onto the
  /// agreement's own configuration entry (spec §4.4). Implementations
  /// tolerate "no such attribute" on delete.
  fn persist_status(&self, agreement_id: &AgreementId, attrs: &[(&str, Option<String>)]);
}

/// Opaque window calendar (spec §3). `in_window_now` is the only operation
/// the engine needs; it is polled synchronously rather than pushed to.
pub trait Schedule: Send + Sync {
  fn in_window_now(&self) -> bool;
}

/// A schedule that is always in-window, useful for tests and for agreements
/// configured without an explicit window calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysInWindow;

impl Schedule for AlwaysInWindow {
  fn in_window_now(&self) -> bool {
    true
  }
}

/// The highest CSN seen per replica id on the remote consumer, shared with
/// whatever subsystem last delivered it (spec §3, §5). Modelled as shared
/// ownership with automatic release rather than the source's manual
/// acquire/release (spec §9); its lifetime is the longer of "held by the
/// agreement" and "held by a current reader".
pub type ConsumerRuvHandle = Arc<RwLock<ConsumerRuv>>;

/// Snapshot of the remote RUV. CSN arithmetic itself remains a collaborator
/// stub (spec §1); this type only carries the raw per-replica entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerRuv {
  pub entries: Vec<(u16, String)>,
}

impl ConsumerRuv {
  pub fn new() -> ConsumerRuvHandle {
    Arc::new(RwLock::new(ConsumerRuv::default()))
  }
}

/// A [`Directory`] that does nothing, for agreements created without a real
/// backend wired in (e.g. unit tests that only exercise the parser or
/// validator).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDirectory;

impl Directory for NullDirectory {
  fn backend_flavor(&self, _subtree: &str) -> BackendFlavor {
    BackendFlavor::Other
  }

  fn default_fractional_attrs(&self) -> Vec<String> {
    Vec::new()
  }

  fn read_tombstone(&self, _subtree: &str) -> TombstoneEntry {
    TombstoneEntry {
      agmt_maxcsn_values: Vec::new(),
    }
  }

  fn write_tombstone_maxcsn(&self, _subtree: &str, _agmt_maxcsn_values: Vec<String>) {}

  fn persist_status(&self, _agreement_id: &AgreementId, _attrs: &[(&str, Option<String>)]) {}
}
