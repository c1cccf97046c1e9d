//! The scalar field set backing an [`crate::agreement::Agreement`] (spec
//! §3), plus the separately-locked fractional-attribute list (spec §4.3,
//! §5).

use std::sync::Arc;

use crate::{
  collaborators::{ConsumerRuvHandle, Protocol},
  model::{
    AgreementId, AgreementType, AutoInitialize, BindMethod, BootstrapBindMethod, IgnoreMissing,
    Transport,
  },
  status::{ChangeCounters, StatusSlot},
};

/// Everything guarded by the agreement's scalar mutex (spec §5). Does not
/// include the fractional-attribute list (its own RW lock) or
/// `protocol_timeout` (a lock-free atomic).
///
/// `Clone` backs `Agreement::mutate`'s validate-before-commit step: a setter
/// mutates a cloned candidate, which is only written back once it passes
/// `validator::validate`.
#[derive(Clone)]
pub struct AgreementFields {
  pub identity: AgreementId,
  pub long_name: String,
  pub session_prefix: String,
  pub session_counter: u16,

  pub remote_host: String,
  pub remote_port: u16,
  pub transport: Transport,
  pub bind_method: BindMethod,
  pub bind_dn: String,
  pub bind_credential: Vec<u8>,

  pub bootstrap_transport: Transport,
  pub bootstrap_bind_method: BootstrapBindMethod,
  pub bootstrap_bind_dn: String,
  pub bootstrap_bind_credential: Vec<u8>,

  pub replicated_subtree: String,
  pub strip_attrs: Vec<String>,

  pub enabled: bool,
  pub auto_initialize: AutoInitialize,

  pub timeout_seconds: u32,
  pub busy_wait_seconds: u32,
  pub pause_seconds: u32,
  pub flow_window: u32,
  pub flow_pause_ms: u32,
  pub wait_async_ms: u32,
  pub ignore_missing: IgnoreMissing,

  pub consumer_ruv: ConsumerRuvHandle,
  pub consumer_schema_csn: Option<String>,
  pub consumer_rid: u16,
  pub rid_tentative: bool,

  pub agreement_maxcsn: Option<String>,
  pub change_counters: ChangeCounters,

  pub last_update: StatusSlot,
  pub last_init: StatusSlot,

  pub update_in_progress: bool,
  pub stop_in_progress: bool,

  pub agreement_type: AgreementType,

  /// Handle to the running worker; `None` when stopped (spec §3). Replaced
  /// across restarts.
  pub protocol: Option<Arc<dyn Protocol>>,
}

/// The fractional-attribute lists, guarded by their own reader/writer lock
/// so the hot write path can take a shared lock while filtering mods
/// (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct FractionalAttrs {
  pub incremental: Vec<String>,
  pub total: Option<Vec<String>>,
}

impl FractionalAttrs {
  /// Membership in the incremental exclude set.
  pub fn is_excluded(&self, attr: &str) -> bool {
    self.incremental.iter().any(|a| a.eq_ignore_ascii_case(attr))
  }

  /// Membership in the total exclude set, falling back to the incremental
  /// set when `total` is undefined (spec §3, §4.3).
  pub fn is_excluded_total(&self, attr: &str) -> bool {
    match &self.total {
      Some(total) => total.iter().any(|a| a.eq_ignore_ascii_case(attr)),
      None => self.is_excluded(attr),
    }
  }
}
