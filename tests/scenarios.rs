//! End-to-end scenarios S4-S6 from the design notes, plus the lifecycle
//! testable properties that need a real (fake) Protocol/Directory pair to
//! exercise.

use std::sync::{Arc, Mutex};

use repl_agreement_engine::{
  agreement::Agreement,
  collaborators::{AlwaysInWindow, Directory, Protocol, ProtocolFactory, TombstoneEntry},
  lifecycle,
  model::{AgreementId, BackendFlavor, Change, Mod, OperationKind},
  record::AgreementRecord,
};

#[derive(Default)]
struct FakeDirectory {
  tombstone: Mutex<Vec<String>>,
}

impl Directory for FakeDirectory {
  fn backend_flavor(&self, _subtree: &str) -> BackendFlavor {
    BackendFlavor::Other
  }

  fn default_fractional_attrs(&self) -> Vec<String> {
    Vec::new()
  }

  fn read_tombstone(&self, _subtree: &str) -> TombstoneEntry {
    TombstoneEntry {
      agmt_maxcsn_values: self.tombstone.lock().unwrap().clone(),
    }
  }

  fn write_tombstone_maxcsn(&self, _subtree: &str, agmt_maxcsn_values: Vec<String>) {
    *self.tombstone.lock().unwrap() = agmt_maxcsn_values;
  }

  fn persist_status(&self, _agreement_id: &AgreementId, _attrs: &[(&str, Option<String>)]) {}
}

#[derive(Default)]
struct RecordingProtocol {
  changes: Mutex<Vec<String>>,
  stopped: Mutex<bool>,
}

impl Protocol for RecordingProtocol {
  fn notify_config_changed(&self) {}

  fn notify_change(&self, change: &Change) {
    self.changes.lock().unwrap().push(change.dn.clone());
  }

  fn stop(&self) {
    *self.stopped.lock().unwrap() = true;
  }
}

struct RecordingFactory {
  spawned: Mutex<Vec<Arc<RecordingProtocol>>>,
}

impl RecordingFactory {
  fn new() -> Self {
    RecordingFactory {
      spawned: Mutex::new(Vec::new()),
    }
  }

  fn last(&self) -> Arc<RecordingProtocol> {
    self.spawned.lock().unwrap().last().unwrap().clone()
  }
}

impl ProtocolFactory for RecordingFactory {
  fn spawn(&self, _id: &AgreementId, _total_init: bool) -> Arc<dyn Protocol> {
    let p = Arc::new(RecordingProtocol::default());
    self.spawned.lock().unwrap().push(p.clone());
    p
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

fn make_agreement(directory: Arc<FakeDirectory>, factory: Arc<RecordingFactory>) -> Arc<Agreement> {
  let record = minimal_record();
  let (agreement, forbidden) =
    Agreement::new_from_record(&record, directory, factory, Arc::new(AlwaysInWindow)).unwrap();
  assert!(forbidden.is_empty());
  agreement
}

#[test]
fn s4_fractional_filter_drop() {
  let directory = Arc::new(FakeDirectory::default());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory, factory.clone());
  agreement.set_fractional_attrs(vec!["jpegPhoto".to_string()]).unwrap();

  lifecycle::start(&agreement).unwrap();
  let worker = factory.last();

  let fully_excluded = Change {
    dn: "dc=x".to_string(),
    op: OperationKind::Modify,
    mods: vec![Mod::new("jpegPhoto")],
    csn: "csn1".to_string(),
  };
  lifecycle::notify_change(&agreement, &fully_excluded);

  let partially_excluded = Change {
    dn: "dc=x".to_string(),
    op: OperationKind::Modify,
    mods: vec![Mod::new("jpegPhoto"), Mod::new("mail")],
    csn: "csn2".to_string(),
  };
  lifecycle::notify_change(&agreement, &partially_excluded);

  let delivered = worker.changes.lock().unwrap().clone();
  assert_eq!(delivered, vec!["dc=x".to_string()]);
}

#[test]
fn s5_maxcsn_match_on_restart() {
  let directory = Arc::new(FakeDirectory::default());
  directory
    .tombstone
    .lock()
    .unwrap()
    .push("dc=x;cn=a;h;389;3;CSN1".to_string());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory, factory);

  lifecycle::start(&agreement).unwrap();

  assert_eq!(
    agreement.get_agreement_maxcsn(),
    Some("dc=x;cn=a;h;389;3;CSN1".to_string())
  );
  let (rid, tentative) = agreement.get_consumer_rid();
  assert_eq!(rid, 3);
  assert!(tentative);
}

#[test]
fn s5_maxcsn_match_with_unavailable_rid() {
  let directory = Arc::new(FakeDirectory::default());
  directory
    .tombstone
    .lock()
    .unwrap()
    .push("dc=x;cn=a;h;389;unavailable;CSN1".to_string());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory, factory);

  lifecycle::start(&agreement).unwrap();

  assert_eq!(
    agreement.get_agreement_maxcsn(),
    Some("dc=x;cn=a;h;389;unavailable;CSN1".to_string())
  );
  // "unavailable" does not parse as a u16, so the rid stays at its default.
  let (rid, _tentative) = agreement.get_consumer_rid();
  assert_eq!(rid, 0);
}

#[test]
fn start_stop_leaves_no_running_protocol() {
  let directory = Arc::new(FakeDirectory::default());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory, factory.clone());

  lifecycle::start(&agreement).unwrap();
  assert!(agreement.has_running_protocol());

  lifecycle::stop(&agreement).unwrap();
  assert!(!agreement.has_running_protocol());
  assert!(!agreement.get_update_in_progress());
  assert!(*factory.last().stopped.lock().unwrap());
}

#[test]
fn stop_is_idempotent() {
  let directory = Arc::new(FakeDirectory::default());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory, factory);

  lifecycle::start(&agreement).unwrap();
  lifecycle::stop(&agreement).unwrap();
  lifecycle::stop(&agreement).unwrap();
  assert!(!agreement.has_running_protocol());
}

#[test]
fn s6_status_mapping_via_repl_result() {
  use chrono::{TimeZone, Utc};
  use repl_agreement_engine::status::{build_status, is_reset, ReplResult, StatusState};

  let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

  let (human, json) = build_status(32, ReplResult::Other(0), None, Some(""), now).unwrap();
  assert!(human.starts_with("Error (32) "));
  assert_eq!(json.state, StatusState::Red);

  let (_, json) = build_status(0, ReplResult::Busy, None, Some("peer"), now).unwrap();
  assert_eq!(json.state, StatusState::Amber);

  let (_, json) = build_status(0, ReplResult::from_code(0), None, Some("ok"), now).unwrap();
  assert_eq!(json.state, StatusState::Green);

  assert!(is_reset(0, true, None));
}

#[test]
fn delete_releases_tombstone_entry() {
  let directory = Arc::new(FakeDirectory::default());
  directory
    .tombstone
    .lock()
    .unwrap()
    .push("dc=x;cn=a;h;389;3;CSN1".to_string());
  directory
    .tombstone
    .lock()
    .unwrap()
    .push("dc=x;cn=other;h2;390;4;CSN2".to_string());
  let factory = Arc::new(RecordingFactory::new());
  let agreement = make_agreement(directory.clone(), factory);

  lifecycle::delete(&agreement).unwrap();

  let remaining = directory.tombstone.lock().unwrap().clone();
  assert_eq!(remaining, vec!["dc=x;cn=other;h2;390;4;CSN2".to_string()]);
}
