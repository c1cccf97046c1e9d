//! Agreement registry (spec §4.3 "the index"): the process-wide keyed map
//! from agreement identity to live [`Agreement`] handle.
//!
//! Grounded on the teacher's `DataReader` readers-by-guid map
//! (`dds/no_key/datareader.rs`): a single coarse lock around a `HashMap`,
//! with no per-entry locking since entries themselves are already
//! internally synchronised.

use std::{
  collections::HashMap,
  sync::{Arc, RwLock},
};

use log::warn;

use crate::{agreement::Agreement, error::Result, lifecycle, model::AgreementId};

/// Keyed collection of agreements, one per configured consumer (spec §3,
/// §4.3). Cloning an `AgreementStore` is cheap and all clones share state.
#[derive(Clone, Default)]
pub struct AgreementStore {
  inner: Arc<RwLock<HashMap<AgreementId, Arc<Agreement>>>>,
}

impl AgreementStore {
  pub fn new() -> Self {
    AgreementStore {
      inner: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  /// Registers `agreement` under its own identity, replacing any previous
  /// entry with the same identity without stopping it (callers are expected
  /// to have already reconciled that case upstream, per spec §4.3).
  pub fn insert(&self, agreement: Arc<Agreement>) {
    let mut guard = self.inner.write().expect("registry lock poisoned");
    guard.insert(agreement.identity().clone(), agreement);
  }

  pub fn get(&self, id: &AgreementId) -> Option<Arc<Agreement>> {
    self.inner.read().expect("registry lock poisoned").get(id).cloned()
  }

  /// Looks up an agreement by its replication area, returning every
  /// agreement whose replicated subtree covers `dn` (spec §4.3).
  pub fn find_by_replarea(&self, dn: &str) -> Vec<Arc<Agreement>> {
    self
      .inner
      .read()
      .expect("registry lock poisoned")
      .values()
      .filter(|a| a.replarea_matches(dn))
      .cloned()
      .collect()
  }

  /// Removes and deletes the agreement identified by `id` (spec §3, §4.5):
  /// stops its worker and releases its tombstone entry before dropping the
  /// last reference.
  pub fn remove(&self, id: &AgreementId) -> Result<Option<Arc<Agreement>>> {
    let removed = {
      let mut guard = self.inner.write().expect("registry lock poisoned");
      guard.remove(id)
    };
    if let Some(agreement) = &removed {
      lifecycle::delete(agreement)?;
    }
    Ok(removed)
  }

  pub fn iter(&self) -> Vec<Arc<Agreement>> {
    self.inner.read().expect("registry lock poisoned").values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.inner.read().expect("registry lock poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Delivers a local-write change to every agreement whose replication
  /// area covers it (spec §4.5).
  pub fn notify_change(&self, change: &crate::model::Change) {
    for agreement in self.find_by_replarea(&change.dn) {
      lifecycle::notify_change(&agreement, change);
    }
  }

  /// Reconciles `agreement_maxcsn` on every agreement whose replication area
  /// covers the change's DN, after the change has been applied locally
  /// (spec §4.5). Failures are non-fatal (spec §4.5 "Failure model") and are
  /// logged rather than stopping the sweep over the remaining agreements.
  pub fn update_maxcsn(&self, change: &crate::model::Change) {
    for agreement in self.find_by_replarea(&change.dn) {
      if let Err(e) = lifecycle::update_maxcsn(&agreement, change) {
        warn!("{}: failed to update agreement maxcsn: {e}", agreement.identity());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    collaborators::{AlwaysInWindow, NullDirectory},
    model::{Mod, OperationKind},
    record::AgreementRecord,
  };
  use std::sync::Mutex;

  struct RecordingProtocol {
    changes: Mutex<Vec<String>>,
  }

  impl crate::collaborators::Protocol for RecordingProtocol {
    fn notify_config_changed(&self) {}

    fn notify_change(&self, change: &crate::model::Change) {
      self.changes.lock().unwrap().push(change.dn.clone());
    }

    fn stop(&self) {}
  }

  struct RecordingFactory {
    protocol: Arc<RecordingProtocol>,
  }

  impl crate::collaborators::ProtocolFactory for RecordingFactory {
    fn spawn(&self, _id: &AgreementId, _total_init: bool) -> Arc<dyn crate::collaborators::Protocol> {
      self.protocol.clone()
    }
  }

  fn make_agreement(rdn: &str) -> Arc<Agreement> {
    let mut record = AgreementRecord::new();
    record.set("agreement-rdn", rdn);
    record.set("replica-host", "consumer.example.com");
    record.set("replica-port", "389");
    record.set("replica-bind-method", "SIMPLE");
    record.set("replica-bind-dn", "cn=repl");
    record.set("replica-credentials", "secret");
    record.set("replica-root", "dc=example,dc=com");
    let (agreement, _forbidden) = Agreement::new_from_record(
      &record,
      Arc::new(NullDirectory),
      Arc::new(RecordingFactory {
        protocol: Arc::new(RecordingProtocol {
          changes: Mutex::new(Vec::new()),
        }),
      }),
      Arc::new(AlwaysInWindow),
    )
    .unwrap();
    agreement
  }

  #[test]
  fn insert_get_remove_round_trip() {
    let store = AgreementStore::new();
    let agreement = make_agreement("cn=a");
    let id = agreement.identity().clone();
    store.insert(agreement);
    assert_eq!(store.len(), 1);
    assert!(store.get(&id).is_some());
    let removed = store.remove(&id).unwrap();
    assert!(removed.is_some());
    assert!(store.is_empty());
  }

  #[test]
  fn find_by_replarea_matches_subtree() {
    let store = AgreementStore::new();
    store.insert(make_agreement("cn=a"));
    let hits = store.find_by_replarea("uid=bob,dc=example,dc=com");
    assert_eq!(hits.len(), 1);
    let misses = store.find_by_replarea("uid=bob,dc=other,dc=com");
    assert!(misses.is_empty());
  }

  #[test]
  fn notify_change_reaches_matching_agreements() {
    let store = AgreementStore::new();
    store.insert(make_agreement("cn=a"));
    let change = crate::model::Change {
      dn: "uid=bob,dc=example,dc=com".to_string(),
      op: OperationKind::Modify,
      mods: vec![Mod::new("userpassword")],
      csn: "csn1".to_string(),
    };
    // Exercises the dispatch path; RecordingProtocol isn't observable here
    // since it's wrapped in an `Arc<dyn Protocol>` behind the agreement, but
    // the call must not panic.
    store.notify_change(&change);
  }

  #[test]
  fn update_maxcsn_reaches_matching_agreements() {
    let store = AgreementStore::new();
    let agreement = make_agreement("cn=a");
    let id = agreement.identity().clone();
    store.insert(agreement);

    let change = crate::model::Change {
      dn: "uid=bob,dc=example,dc=com".to_string(),
      op: OperationKind::Modify,
      mods: vec![Mod::new("userpassword")],
      csn: "csn1".to_string(),
    };
    store.update_maxcsn(&change);

    let updated = store.get(&id).unwrap();
    assert!(updated.get_agreement_maxcsn().is_some());
  }

  #[test]
  fn update_maxcsn_skips_non_matching_agreements() {
    let store = AgreementStore::new();
    let agreement = make_agreement("cn=a");
    let id = agreement.identity().clone();
    store.insert(agreement);

    let change = crate::model::Change {
      dn: "uid=bob,dc=other,dc=com".to_string(),
      op: OperationKind::Modify,
      mods: vec![Mod::new("userpassword")],
      csn: "csn1".to_string(),
    };
    store.update_maxcsn(&change);

    let untouched = store.get(&id).unwrap();
    assert!(untouched.get_agreement_maxcsn().is_none());
  }
}
