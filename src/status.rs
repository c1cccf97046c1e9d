//! Status & Counters (spec §4.4): per-agreement human and structured status
//! lines, and per-remote-replica change counters.
//!
//! Grounded on the teacher's `statusevents.rs` approach of mapping raw event
//! data into a small set of pure data types; here the mapping produces a
//! human line plus a JSON line instead of an enum variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::MAX_SUPPLIERS;

/// Result-code bucket an update or init session ended in (spec §4.4).
///
/// `Acquired` and `UpToDate` both correspond to "nothing went wrong", but are
/// kept distinct because the status-mapping table treats them differently:
/// `Acquired` (wire code 0, with a message) still writes a green status line,
/// while `UpToDate` (the sentinel a session reports when there was nothing
/// to replicate) suppresses the write entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplResult {
  Acquired,
  UpToDate,
  Busy,
  Transient,
  Backoff,
  ReleaseSucceeded,
  Disabled,
  Other(i32),
}

impl ReplResult {
  /// Inverse of [`ReplResult::code`]: maps a raw protocol result code back
  /// into its symbolic bucket, for callers (like
  /// [`crate::agreement::Agreement::set_last_update_status`]) that only have
  /// the wire-level integer. `UpToDate` has no wire representation here;
  /// callers that need it construct the variant directly.
  pub fn from_code(code: i32) -> ReplResult {
    match code {
      0 => ReplResult::Acquired,
      1 => ReplResult::Busy,
      2 => ReplResult::Transient,
      3 => ReplResult::Backoff,
      4 => ReplResult::ReleaseSucceeded,
      5 => ReplResult::Disabled,
      other => ReplResult::Other(other),
    }
  }

  fn code(&self) -> i32 {
    match self {
      ReplResult::Acquired | ReplResult::UpToDate => 0,
      ReplResult::Busy => 1,
      ReplResult::Transient => 2,
      ReplResult::Backoff => 3,
      ReplResult::ReleaseSucceeded => 4,
      ReplResult::Disabled => 5,
      ReplResult::Other(c) => *c,
    }
  }

  fn text(&self) -> &'static str {
    match self {
      ReplResult::Acquired => "replica acquired",
      ReplResult::UpToDate => "replica is up to date",
      ReplResult::Busy => "can't acquire busy replica",
      ReplResult::Transient => "transient error",
      ReplResult::Backoff => "backing off",
      ReplResult::ReleaseSucceeded => "replica released successfully",
      ReplResult::Disabled => "replica is disabled",
      ReplResult::Other(_) => "protocol error",
    }
  }
}

/// Severity bucket surfaced in the status JSON (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
  Green,
  Amber,
  Red,
}

/// Structured form of a status line (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusJson {
  pub state: StatusState,
  pub ldap_rc: String,
  pub ldap_rc_text: String,
  pub repl_rc: String,
  pub repl_rc_text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub conn_rc: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub conn_rc_text: Option<String>,
  pub date: String,
  pub message: String,
}

/// One rotating status slot: last-update or last-init (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct StatusSlot {
  pub start: Option<i64>,
  pub end: Option<i64>,
  pub human: String,
  pub json: Option<StatusJson>,
}

impl StatusSlot {
  pub fn clear(&mut self) {
    self.human.clear();
    self.json = None;
  }
}

fn ldap_rc_text(rc: i32) -> String {
  if rc == 0 {
    "success".to_string()
  } else {
    format!("LDAP error {rc}")
  }
}

/// Pure mapping from `(ldap_rc, repl_rc, conn_rc?, message)` to a human line
/// and a JSON line, per the table in spec §4.4. Returns `None` when
/// `repl_rc` is `UpToDate` (no status write) or when everything is zero and
/// there is no message (status is cleared instead of rewritten).
///
/// `now` is injected rather than read from the clock so the mapping stays a
/// pure function and is exactly reproducible in tests.
#[allow(clippy::too_many_arguments)]
pub fn build_status(
  ldap_rc: i32,
  repl_rc: ReplResult,
  conn_rc: Option<i32>,
  message: Option<&str>,
  now: DateTime<Utc>,
) -> Option<(String, StatusJson)> {
  if matches!(repl_rc, ReplResult::UpToDate) {
    return None;
  }

  let date = now.to_rfc3339();
  let message = message.unwrap_or("").to_string();

  if ldap_rc != 0 {
    let human = format!(
      "Error ({ldap_rc}) {} ({})",
      ldap_rc_text(ldap_rc),
      repl_rc.text()
    );
    let json = StatusJson {
      state: StatusState::Red,
      ldap_rc: ldap_rc.to_string(),
      ldap_rc_text: ldap_rc_text(ldap_rc),
      repl_rc: repl_rc.code().to_string(),
      repl_rc_text: repl_rc.text().to_string(),
      conn_rc: conn_rc.map(|c| c.to_string()),
      conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
      date,
      message,
    };
    return Some((human, json));
  }

  match repl_rc {
    ReplResult::Acquired => {
      let human = "Replica acquired".to_string();
      let json = StatusJson {
        state: StatusState::Green,
        ldap_rc: "0".to_string(),
        ldap_rc_text: ldap_rc_text(0),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text().to_string(),
        conn_rc: conn_rc.map(|c| c.to_string()),
        conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
        date,
        message,
      };
      Some((human, json))
    }
    ReplResult::Busy | ReplResult::Transient | ReplResult::Backoff => {
      let human = format!("Replication currently in progress ({})", repl_rc.text());
      let json = StatusJson {
        state: StatusState::Amber,
        ldap_rc: "0".to_string(),
        ldap_rc_text: ldap_rc_text(0),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text().to_string(),
        conn_rc: conn_rc.map(|c| c.to_string()),
        conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
        date,
        message,
      };
      Some((human, json))
    }
    ReplResult::ReleaseSucceeded => {
      let human = "Replication session successful".to_string();
      let json = StatusJson {
        state: StatusState::Green,
        ldap_rc: "0".to_string(),
        ldap_rc_text: ldap_rc_text(0),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text().to_string(),
        conn_rc: conn_rc.map(|c| c.to_string()),
        conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
        date,
        message,
      };
      Some((human, json))
    }
    ReplResult::Disabled => {
      let human =
        "Replication is disabled for this suffix; enable it to resume updates".to_string();
      let json = StatusJson {
        state: StatusState::Red,
        ldap_rc: "0".to_string(),
        ldap_rc_text: ldap_rc_text(0),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text().to_string(),
        conn_rc: conn_rc.map(|c| c.to_string()),
        conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
        date,
        message,
      };
      Some((human, json))
    }
    ReplResult::Other(code) => {
      let human = format!("Error ({code}) protocol error ({})", repl_rc.text());
      let json = StatusJson {
        state: StatusState::Red,
        ldap_rc: "0".to_string(),
        ldap_rc_text: ldap_rc_text(0),
        repl_rc: repl_rc.code().to_string(),
        repl_rc_text: repl_rc.text().to_string(),
        conn_rc: conn_rc.map(|c| c.to_string()),
        conn_rc_text: conn_rc.map(|c| ldap_rc_text(c)),
        date,
        message,
      };
      Some((human, json))
    }
    ReplResult::UpToDate => unreachable!("handled above"),
  }
}

/// `(ldap_rc=0, repl_rc=0, message=None)` has its own rule: both lines are
/// cleared rather than rewritten (spec §4.4 last row). Callers check for this
/// case before calling [`build_status`] since it carries no [`ReplResult`].
pub fn is_reset(ldap_rc: i32, repl_rc_is_zero: bool, message: Option<&str>) -> bool {
  ldap_rc == 0 && repl_rc_is_zero && message.is_none()
}

/// Per-remote-replica change counter (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCounter {
  pub remote_rid: u16,
  pub replayed: u64,
  pub skipped: u64,
}

/// Ordered list of change counters, bounded by [`MAX_SUPPLIERS`] in its
/// initial capacity but dynamically extensible (spec §3, §4.3).
#[derive(Debug, Clone, Default)]
pub struct ChangeCounters(Vec<ChangeCounter>);

impl ChangeCounters {
  pub fn new() -> Self {
    ChangeCounters(Vec::with_capacity(MAX_SUPPLIERS))
  }

  /// Increments the counter for `remote_rid`, allocating a new record if the
  /// rid is new. Preserves the single-record-per-rid invariant.
  pub fn increment(&mut self, remote_rid: u16, skipped: bool) {
    if let Some(counter) = self.0.iter_mut().find(|c| c.remote_rid == remote_rid) {
      if skipped {
        counter.skipped += 1;
      } else {
        counter.replayed += 1;
      }
      return;
    }
    self.0.push(ChangeCounter {
      remote_rid,
      replayed: if skipped { 0 } else { 1 },
      skipped: if skipped { 1 } else { 0 },
    });
  }

  pub fn get(&self, remote_rid: u16) -> Option<ChangeCounter> {
    self.0.iter().find(|c| c.remote_rid == remote_rid).copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Renders the counter table as a space-separated sequence of
  /// `rid:replayed/skipped` tokens (spec §4.4).
  pub fn render(&self) -> String {
    self
      .0
      .iter()
      .map(|c| format!("{}:{}/{}", c.remote_rid, c.replayed, c.skipped))
      .collect::<Vec<_>>()
      .join(" ")
  }
}
