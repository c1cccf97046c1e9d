//! Agreement Store (spec §4.3): the in-memory `Agreement` (a
//! reference-counted, internally-locked handle) exposing typed getters,
//! individually-guarded setters and lifecycle operations.
//!
//! Grounded on `SimpleDataReader`'s shape (teacher's
//! `dds/no_key/simpledatareader.rs`): a thin public type delegating to
//! internal state kept behind a lock, with copy-out getters rather than
//! returning references that would outlive the lock.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc, Mutex, RwLock,
};

use crate::{
  collaborators::{Directory, ProtocolFactory, Schedule},
  error::{AgreementError, Result},
  fields::{AgreementFields, FractionalAttrs},
  model::{
    AgreementId, AgreementType, AutoInitialize, BindMethod, BootstrapBindMethod, IgnoreMissing,
    Transport,
  },
  parser::{self, ParsedAgreement},
  record::AgreementRecord,
  status::{ChangeCounter, StatusSlot},
};

/// The durable record binding one local supplier to one remote consumer
/// (spec §3). Cheap to clone (an `Arc`); every clone refers to the same
/// underlying state.
pub struct Agreement {
  /// Stable for the agreement's lifetime; cached outside the lock since it
  /// never changes and several hot-path checks need it (spec §3 invariant).
  identity: AgreementId,
  /// Immutable after creation (spec §3); cached outside the lock for the
  /// same reason.
  replicated_subtree: String,
  agreement_type: AgreementType,

  pub(crate) fields: Mutex<AgreementFields>,
  pub(crate) fractional: RwLock<FractionalAttrs>,
  /// Small lock-free channel between admin and worker (spec §4.3).
  pub(crate) protocol_timeout: AtomicU64,

  pub(crate) directory: Arc<dyn Directory>,
  pub(crate) protocol_factory: Arc<dyn ProtocolFactory>,
  pub(crate) schedule: Arc<dyn Schedule>,
}

impl Agreement {
  /// Builds and validates an agreement from a configuration record
  /// (spec §4.2). Returns the forbidden attributes filtered out of the
  /// fractional lists alongside the agreement so the caller can log an
  /// administrative error (spec §4.2).
  pub fn new_from_record(
    record: &AgreementRecord,
    directory: Arc<dyn Directory>,
    protocol_factory: Arc<dyn ProtocolFactory>,
    schedule: Arc<dyn Schedule>,
  ) -> Result<(Arc<Agreement>, Vec<String>)> {
    let ParsedAgreement {
      fields,
      fractional,
      forbidden_attrs_filtered,
    } = parser::parse(record, directory.as_ref())?;

    let identity = fields.identity.clone();
    let replicated_subtree = fields.replicated_subtree.clone();
    let agreement_type = fields.agreement_type;

    let agreement = Arc::new(Agreement {
      identity,
      replicated_subtree,
      agreement_type,
      fields: Mutex::new(fields),
      fractional: RwLock::new(fractional),
      protocol_timeout: AtomicU64::new(0),
      directory,
      protocol_factory,
      schedule,
    });

    Ok((agreement, forbidden_attrs_filtered))
  }

  pub fn identity(&self) -> &AgreementId {
    &self.identity
  }

  pub fn replicated_subtree(&self) -> &str {
    &self.replicated_subtree
  }

  pub fn agreement_type(&self) -> AgreementType {
    self.agreement_type
  }

  /// `dn` equality on canonical DN form (spec §4.3). Canonicalisation here
  /// is case-insensitive comparison, matching LDAP DN equality semantics.
  pub fn matches_name(&self, dn: &str) -> bool {
    self.identity.dn.eq_ignore_ascii_case(dn)
  }

  /// Whether `dn` falls under this agreement's replicated subtree.
  pub fn replarea_matches(&self, dn: &str) -> bool {
    dn.eq_ignore_ascii_case(&self.replicated_subtree)
      || dn
        .to_ascii_lowercase()
        .ends_with(&format!(",{}", self.replicated_subtree.to_ascii_lowercase()))
  }

  pub fn in_schedule_now(&self) -> bool {
    self.schedule.in_window_now()
  }

  pub fn protocol_timeout(&self) -> u64 {
    self.protocol_timeout.load(Ordering::SeqCst)
  }

  pub fn set_protocol_timeout(&self, value: u64) {
    self.protocol_timeout.store(value, Ordering::SeqCst);
  }

  // -- scalar getters -----------------------------------------------------

  pub fn get_long_name(&self) -> String {
    self.lock().long_name.clone()
  }

  pub fn get_session_prefix(&self) -> String {
    self.lock().session_prefix.clone()
  }

  pub fn get_session_counter(&self) -> u16 {
    self.lock().session_counter
  }

  /// Renders the current session-id tag, `"<prefix> NNN"` (spec §6).
  pub fn session_tag(&self) -> String {
    let f = self.lock();
    format!("{} {:03}", f.session_prefix, f.session_counter)
  }

  pub fn get_remote_host(&self) -> String {
    self.lock().remote_host.clone()
  }

  pub fn get_remote_port(&self) -> u16 {
    self.lock().remote_port
  }

  pub fn get_transport(&self) -> Transport {
    self.lock().transport
  }

  pub fn get_bind_method(&self) -> BindMethod {
    self.lock().bind_method
  }

  pub fn get_bind_dn(&self) -> String {
    self.lock().bind_dn.clone()
  }

  pub fn get_bind_credential(&self) -> Vec<u8> {
    self.lock().bind_credential.clone()
  }

  pub fn get_bootstrap_transport(&self) -> Transport {
    self.lock().bootstrap_transport
  }

  pub fn get_bootstrap_bind_method(&self) -> BootstrapBindMethod {
    self.lock().bootstrap_bind_method
  }

  pub fn get_enabled(&self) -> bool {
    self.lock().enabled
  }

  pub fn get_auto_initialize(&self) -> AutoInitialize {
    self.lock().auto_initialize
  }

  pub fn get_timeout_seconds(&self) -> u32 {
    self.lock().timeout_seconds
  }

  pub fn get_busy_wait_seconds(&self) -> u32 {
    self.lock().busy_wait_seconds
  }

  pub fn get_pause_seconds(&self) -> u32 {
    self.lock().pause_seconds
  }

  pub fn get_flow_window(&self) -> u32 {
    self.lock().flow_window
  }

  pub fn get_flow_pause_ms(&self) -> u32 {
    self.lock().flow_pause_ms
  }

  pub fn get_wait_async_ms(&self) -> u32 {
    self.lock().wait_async_ms
  }

  pub fn get_ignore_missing(&self) -> IgnoreMissing {
    self.lock().ignore_missing
  }

  pub fn get_consumer_rid(&self) -> (u16, bool) {
    let f = self.lock();
    (f.consumer_rid, f.rid_tentative)
  }

  pub fn get_agreement_maxcsn(&self) -> Option<String> {
    self.lock().agreement_maxcsn.clone()
  }

  pub fn get_strip_attrs(&self) -> Vec<String> {
    self.lock().strip_attrs.clone()
  }

  pub fn get_last_update(&self) -> StatusSlot {
    self.lock().last_update.clone()
  }

  pub fn get_last_init(&self) -> StatusSlot {
    self.lock().last_init.clone()
  }

  pub fn get_update_in_progress(&self) -> bool {
    self.lock().update_in_progress
  }

  pub fn get_stop_in_progress(&self) -> bool {
    self.lock().stop_in_progress
  }

  pub fn has_running_protocol(&self) -> bool {
    self.lock().protocol.is_some()
  }

  pub fn get_change_counter(&self, remote_rid: u16) -> Option<ChangeCounter> {
    self.lock().change_counters.get(remote_rid)
  }

  pub fn render_change_counters(&self) -> String {
    self.lock().change_counters.render()
  }

  // -- fractional attribute membership (spec §4.3) -------------------------

  pub fn is_fractional_attr(&self, name: &str) -> bool {
    self.fractional.read().expect("fractional lock poisoned").is_excluded(name)
  }

  pub fn is_fractional_attr_total(&self, name: &str) -> bool {
    self
      .fractional
      .read()
      .expect("fractional lock poisoned")
      .is_excluded_total(name)
  }

  pub fn get_fractional_attrs(&self) -> Vec<String> {
    self.fractional.read().expect("fractional lock poisoned").incremental.clone()
  }

  pub fn get_fractional_attrs_total(&self) -> Option<Vec<String>> {
    self.fractional.read().expect("fractional lock poisoned").total.clone()
  }

  // -- scalar setters -------------------------------------------------------
  //
  // All follow the pattern: lock -> mutate -> unlock -> notify worker
  // (spec §5), and are a no-op while `stop_in_progress` is set (spec §4.3,
  // testable property 5).

  pub fn set_remote_host(&self, host: String) -> Result<()> {
    self.mutate(|f| {
      f.remote_host = host;
      f.long_name = format!(
        "agmt=\"{}\" ({}:{})",
        f.identity.rdn,
        crate::model::short_host(&f.remote_host),
        f.remote_port
      );
      Ok(())
    })
  }

  pub fn set_remote_port(&self, port: u16) -> Result<()> {
    self.mutate(|f| {
      f.remote_port = port;
      f.long_name = format!(
        "agmt=\"{}\" ({}:{})",
        f.identity.rdn,
        crate::model::short_host(&f.remote_host),
        f.remote_port
      );
      Ok(())
    })
  }

  /// Sets the primary transport from a raw `transport-info` value. An
  /// unrecognised value is a no-op, per spec §4.2/§9.
  pub fn set_transport_from_record(&self, raw: Option<&str>) -> Result<()> {
    self.mutate(|f| {
      f.transport = parser::resolve_primary_transport(f.transport, raw);
      Ok(())
    })
  }

  /// Sets the bootstrap transport from a raw value. Unlike the primary
  /// transport, an unrecognised value is a hard error (spec §4.2/§9).
  pub fn set_bootstrap_transport_from_record(&self, raw: Option<&str>) -> Result<()> {
    let resolved = parser::resolve_bootstrap_transport(raw)?;
    self.mutate(|f| {
      f.bootstrap_transport = resolved;
      Ok(())
    })
  }

  pub fn set_bind_method(&self, method: BindMethod) -> Result<()> {
    self.mutate(|f| {
      f.bind_method = method;
      Ok(())
    })
  }

  pub fn set_bind_dn(&self, dn: String) -> Result<()> {
    self.mutate(|f| {
      f.bind_dn = dn;
      Ok(())
    })
  }

  pub fn set_bind_credential(&self, credential: Vec<u8>) -> Result<()> {
    self.mutate(|f| {
      f.bind_credential = credential;
      Ok(())
    })
  }

  pub fn set_strip_attrs(&self, attrs: Vec<String>) -> Result<()> {
    self.mutate(|f| {
      f.strip_attrs = attrs;
      Ok(())
    })
  }

  pub fn set_fractional_attrs(&self, attrs: Vec<String>) -> Result<()> {
    self.mutate_fractional(|f| {
      f.incremental = attrs;
    })
  }

  pub fn set_fractional_attrs_total(&self, attrs: Option<Vec<String>>) -> Result<()> {
    self.mutate_fractional(|f| {
      f.total = attrs;
    })
  }

  pub fn set_timeout_seconds(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.timeout_seconds = value;
      Ok(())
    })
  }

  pub fn set_busy_wait_seconds(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.busy_wait_seconds = value;
      Ok(())
    })
  }

  pub fn set_pause_seconds(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.pause_seconds = value;
      Ok(())
    })
  }

  pub fn set_flow_window(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.flow_window = value;
      Ok(())
    })
  }

  pub fn set_flow_pause_ms(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.flow_pause_ms = value;
      Ok(())
    })
  }

  pub fn set_wait_async_ms(&self, value: u32) -> Result<()> {
    self.mutate(|f| {
      f.wait_async_ms = value;
      Ok(())
    })
  }

  pub fn set_ignore_missing(&self, value: IgnoreMissing) -> Result<()> {
    self.mutate(|f| {
      f.ignore_missing = value;
      Ok(())
    })
  }

  pub fn set_consumer_schema_csn(&self, csn: Option<String>) -> Result<()> {
    self.mutate(|f| {
      f.consumer_schema_csn = csn;
      Ok(())
    })
  }

  pub fn set_consumer_rid(&self, rid: u16, tentative: bool) -> Result<()> {
    self.mutate(|f| {
      f.consumer_rid = rid;
      f.rid_tentative = tentative;
      Ok(())
    })
  }

  /// Advances the per-session log-correlation counter, cycling
  /// `1 -> 2 -> ... -> 999 -> 1` (spec §8 testable property 8). Returns the
  /// new value.
  pub fn set_session_id(&self) -> Result<u16> {
    self.mutate(|f| {
      f.session_counter = if f.session_counter >= 999 {
        1
      } else {
        f.session_counter + 1
      };
      Ok(f.session_counter)
    })
  }

  pub fn set_agreement_maxcsn(&self, maxcsn: Option<String>) -> Result<()> {
    self.mutate(|f| {
      f.agreement_maxcsn = maxcsn;
      Ok(())
    })
  }

  pub fn inc_change_counter(&self, remote_rid: u16, skipped: bool) {
    let mut guard = self.lock_mut();
    guard.change_counters.increment(remote_rid, skipped);
  }

  /// Flips `enabled`. Callers should route this through
  /// [`crate::lifecycle::set_enabled`] rather than calling it directly, so
  /// the start/stop side effects of spec §4.5 actually happen.
  pub(crate) fn set_enabled_flag(&self, enabled: bool) -> Result<()> {
    self.mutate(|f| {
      f.enabled = enabled;
      Ok(())
    })
  }

  pub(crate) fn set_auto_initialize(&self, value: AutoInitialize) -> Result<()> {
    self.mutate(|f| {
      f.auto_initialize = value;
      Ok(())
    })
  }

  /// Records the outcome of an incremental session (spec §4.4, §8 scenario
  /// S6): maps `(ldap_rc, repl_rc, conn_rc, message)` to a status line pair,
  /// writes it into `last_update`, and persists it through the Directory
  /// collaborator. `repl_rc = 0` together with `ldap_rc = 0` and no message
  /// clears the slot instead of rewriting it.
  pub fn set_last_update_status(
    &self,
    ldap_rc: i32,
    repl_rc: i32,
    conn_rc: Option<i32>,
    message: Option<&str>,
  ) -> Result<()> {
    self.record_status(true, ldap_rc, repl_rc, conn_rc, message)
  }

  /// Same as [`Agreement::set_last_update_status`] but for the `last_init`
  /// slot (spec §4.4).
  pub fn set_last_init_status(
    &self,
    ldap_rc: i32,
    repl_rc: i32,
    conn_rc: Option<i32>,
    message: Option<&str>,
  ) -> Result<()> {
    self.record_status(false, ldap_rc, repl_rc, conn_rc, message)
  }

  fn record_status(
    &self,
    is_update: bool,
    ldap_rc: i32,
    repl_rc: i32,
    conn_rc: Option<i32>,
    message: Option<&str>,
  ) -> Result<()> {
    use crate::status::{build_status, is_reset, ReplResult};

    let now = chrono::Utc::now();
    let result = ReplResult::from_code(repl_rc);

    let prefix = if is_update { "last-update" } else { "last-init" };
    let status_key = format!("{prefix}-status");
    let json_key = format!("{prefix}-status-json");

    if is_reset(ldap_rc, repl_rc == 0, message) {
      self.mutate(|f| {
        let slot = if is_update { &mut f.last_update } else { &mut f.last_init };
        slot.clear();
        Ok(())
      })?;
      self.directory.persist_status(
        &self.identity,
        &[(status_key.as_str(), None), (json_key.as_str(), None)],
      );
      return Ok(());
    }

    let Some((human, json)) = build_status(ldap_rc, result, conn_rc, message, now) else {
      return Ok(());
    };

    let end = now.timestamp();
    let json_text = serde_json::to_string(&json).unwrap_or_default();
    self.mutate(|f| {
      let slot = if is_update { &mut f.last_update } else { &mut f.last_init };
      if slot.start.is_none() {
        slot.start = Some(end);
      }
      slot.end = Some(end);
      slot.human = human.clone();
      slot.json = Some(json.clone());
      Ok(())
    })?;

    self.directory.persist_status(
      &self.identity,
      &[
        (status_key.as_str(), Some(human)),
        (json_key.as_str(), Some(json_text)),
      ],
    );
    Ok(())
  }

  // -- internals -------------------------------------------------------

  fn lock(&self) -> std::sync::MutexGuard<'_, AgreementFields> {
    self.fields.lock().expect("agreement mutex poisoned")
  }

  fn lock_mut(&self) -> std::sync::MutexGuard<'_, AgreementFields> {
    self.lock()
  }

  /// Applies `f` to a candidate copy of the locked field set, refusing the
  /// update if `stop_in_progress` is set. The candidate is validated against
  /// every invariant in spec §3 before it is committed; a failing candidate
  /// is discarded and the live state is left untouched (spec §4.1, §4.3).
  /// Notifies the running worker (if any) outside the lock (spec §5).
  pub(crate) fn mutate<T: Default>(
    &self,
    f: impl FnOnce(&mut AgreementFields) -> Result<T>,
  ) -> Result<T> {
    let (result, protocol) = {
      let mut guard = self.lock();
      if guard.stop_in_progress {
        return Ok(T::default());
      }
      let mut candidate = guard.clone();
      let result = f(&mut candidate)?;
      crate::validator::validate(&candidate)
        .map_err(|e| AgreementError::ConfigConflict(e.to_string()))?;
      *guard = candidate;
      (result, guard.protocol.clone())
    };
    if let Some(protocol) = protocol {
      protocol.notify_config_changed();
    }
    Ok(result)
  }

  /// Same as [`Agreement::mutate`] but for the fractional-attribute RW lock.
  fn mutate_fractional(&self, f: impl FnOnce(&mut FractionalAttrs)) -> Result<()> {
    let protocol = {
      let guard = self.lock();
      if guard.stop_in_progress {
        return Ok(());
      }
      guard.protocol.clone()
    };
    {
      let mut fractional = self.fractional.write().expect("fractional lock poisoned");
      f(&mut fractional);
    }
    if let Some(protocol) = protocol {
      protocol.notify_config_changed();
    }
    Ok(())
  }

}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{collaborators::NullDirectory, record::AgreementRecord};

  struct NoopProtocol;
  impl crate::collaborators::Protocol for NoopProtocol {
    fn notify_config_changed(&self) {}
    fn notify_change(&self, _change: &crate::model::Change) {}
    fn stop(&self) {}
  }

  struct NoopFactory;
  impl ProtocolFactory for NoopFactory {
    fn spawn(&self, _id: &AgreementId, _total_init: bool) -> Arc<dyn crate::collaborators::Protocol> {
      Arc::new(NoopProtocol)
    }
  }

  fn minimal_record() -> AgreementRecord {
    AgreementRecord::from_pairs([
      ("replica-host", "h"),
      ("replica-port", "389"),
      ("replica-root", "dc=x"),
      ("replica-bind-method", "SIMPLE"),
      ("replica-bind-dn", "cn=u"),
      ("replica-credentials", "p"),
      ("agreement-rdn", "cn=a"),
    ])
  }

  fn make_agreement() -> Arc<Agreement> {
    let record = minimal_record();
    let (agreement, forbidden) = Agreement::new_from_record(
      &record,
      Arc::new(NullDirectory),
      Arc::new(NoopFactory),
      Arc::new(crate::collaborators::AlwaysInWindow),
    )
    .unwrap();
    assert!(forbidden.is_empty());
    agreement
  }

  #[test]
  fn parsed_fields_round_trip_through_getters() {
    let agreement = make_agreement();
    assert_eq!(agreement.get_remote_host(), "h");
    assert_eq!(agreement.get_remote_port(), 389);
    assert_eq!(agreement.get_bind_dn(), "cn=u");
    assert_eq!(agreement.get_timeout_seconds(), 120);
    assert_eq!(agreement.get_flow_window(), 1000);
  }

  #[test]
  fn set_from_record_after_parse_is_a_no_op() {
    let agreement = make_agreement();
    agreement.set_remote_host("h".to_string()).unwrap();
    agreement.set_remote_port(389).unwrap();
    agreement.set_bind_dn("cn=u".to_string()).unwrap();
    assert_eq!(agreement.get_remote_host(), "h");
    assert_eq!(agreement.get_remote_port(), 389);
    assert_eq!(agreement.get_bind_dn(), "cn=u");
  }

  #[test]
  fn set_star_is_a_no_op_while_stop_in_progress() {
    let agreement = make_agreement();
    agreement.lock_mut().stop_in_progress = true;
    agreement.set_remote_host("changed".to_string()).unwrap();
    assert_eq!(agreement.get_remote_host(), "h");
  }

  #[test]
  fn session_id_cycles_1_to_999_and_wraps() {
    let agreement = make_agreement();
    assert_eq!(agreement.set_session_id().unwrap(), 2);
    for _ in 0..997 {
      agreement.set_session_id().unwrap();
    }
    assert_eq!(agreement.get_session_counter(), 999);
    assert_eq!(agreement.set_session_id().unwrap(), 1);
  }

  #[test]
  fn fractional_filter_is_monotone_in_the_exclude_set() {
    let agreement = make_agreement();
    agreement
      .set_fractional_attrs(vec!["jpegPhoto".to_string(), "mail".to_string()])
      .unwrap();
    assert!(agreement.is_fractional_attr("jpegPhoto"));
    assert!(agreement.is_fractional_attr("mail"));

    agreement.set_fractional_attrs(vec!["jpegPhoto".to_string()]).unwrap();
    // Shrinking the exclude set can only ever make more attrs deliverable,
    // never fewer (spec §8 property 6): anything still excluded under the
    // smaller set was excluded under the larger one too.
    assert!(agreement.is_fractional_attr("jpegPhoto"));
    assert!(!agreement.is_fractional_attr("mail"));
  }

  #[test]
  fn inc_change_counter_preserves_one_record_per_rid() {
    let agreement = make_agreement();
    agreement.inc_change_counter(5, false);
    agreement.inc_change_counter(5, true);
    agreement.inc_change_counter(7, false);
    assert_eq!(agreement.get_change_counter(5).unwrap().replayed, 1);
    assert_eq!(agreement.get_change_counter(5).unwrap().skipped, 1);
    assert_eq!(agreement.get_change_counter(7).unwrap().replayed, 1);
  }

  #[test]
  fn rejects_bind_method_transport_conflict() {
    let agreement = make_agreement();
    let err = agreement.set_bind_method(BindMethod::TlsClientCert).unwrap_err();
    assert!(matches!(err, AgreementError::ConfigConflict(_)));
  }

  #[test]
  fn rejects_malformed_agreement_maxcsn() {
    let agreement = make_agreement();
    let err = agreement
      .set_agreement_maxcsn(Some("dc=x;cn=a;h".to_string()))
      .unwrap_err();
    assert!(matches!(err, AgreementError::ConfigConflict(_)));
  }
}
