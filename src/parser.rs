//! Config Parser (spec §4.2): maps a configuration record into a fully
//! initialised [`AgreementFields`] + [`FractionalAttrs`] pair, or a
//! diagnostic. Owns every default from spec §3.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::warn;
use sha1::{Digest, Sha1};

use crate::{
  collaborators::{ConsumerRuv, Directory},
  error::{AgreementError, Result},
  fields::{AgreementFields, FractionalAttrs},
  model::{
    self, AgreementId, AgreementType, AutoInitialize, BackendFlavor, BindMethod,
    BootstrapBindMethod, IgnoreMissing, Transport, DEFAULT_BUSY_WAIT_SECONDS,
    DEFAULT_FLOW_PAUSE_MS, DEFAULT_FLOW_WINDOW, DEFAULT_PAUSE_SECONDS, DEFAULT_TIMEOUT_SECONDS,
    DEFAULT_WAIT_ASYNC_MS, DUMMY_SESSION_PREFIX, LMDB_FLOW_PAUSE_MS, LMDB_FLOW_WINDOW,
    SESSION_TAG_BUFFER_LEN,
  },
  record::{parse_fractional_list, AgreementRecord},
  status::{ChangeCounters, StatusSlot},
  validator,
};

/// Result of a successful [`parse`]: the agreement's field set, its
/// fractional-attribute lists, and any forbidden attributes that were
/// filtered out of the requested fractional lists (spec §4.2, "returned
/// separately so the caller can log an administrative error").
pub struct ParsedAgreement {
  pub fields: AgreementFields,
  pub fractional: FractionalAttrs,
  pub forbidden_attrs_filtered: Vec<String>,
}

/// Parses a configuration record into a fully initialised agreement
/// (spec §4.2). Runs the validator before returning; an invalid record never
/// produces an agreement.
pub fn parse(record: &AgreementRecord, directory: &dyn Directory) -> Result<ParsedAgreement> {
  let host = record.get_one("replica-host").unwrap_or_default().to_string();
  let port: u16 = record
    .get_one("replica-port")
    .and_then(|v| v.parse().ok())
    .unwrap_or(0);
  let subtree = record.get_one("replica-root").unwrap_or_default().to_string();
  let rdn = record
    .get_one("agreement-rdn")
    .unwrap_or_else(|| record.get_one("replica-host").unwrap_or("agmt"))
    .to_string();
  let dn = record
    .get_one("agreement-dn")
    .map(str::to_string)
    .unwrap_or_else(|| format!("{rdn},{subtree}"));

  let transport = resolve_primary_transport(Transport::Plain, record.get_one("transport-info"));
  let bootstrap_transport = resolve_bootstrap_transport(record.get_one("replica-bootstrap-transport-info"))?;

  let bind_method = model_or_invalid(
    BindMethod::from_str_opt(record.get_one("replica-bind-method")),
    "replica-bind-method",
  )?;
  let bootstrap_bind_method = model_or_invalid(
    BootstrapBindMethod::from_str_opt(record.get_one("replica-bootstrap-bind-method")),
    "replica-bootstrap-bind-method",
  )?;

  let flavor = directory.backend_flavor(&subtree);
  let (default_flow_window, default_flow_pause) = match flavor {
    BackendFlavor::Lmdb => (LMDB_FLOW_WINDOW, LMDB_FLOW_PAUSE_MS),
    BackendFlavor::Other => (DEFAULT_FLOW_WINDOW, DEFAULT_FLOW_PAUSE_MS),
  };

  let auto_initialize = if record.get_one("begin-replica-refresh") == Some("start") {
    AutoInitialize::Total
  } else {
    AutoInitialize::Incremental
  };

  let secure_port: u16 = record
    .get_one("replica-secure-port")
    .and_then(|v| v.parse().ok())
    .unwrap_or(0);
  let session_prefix = compute_session_prefix(&subtree, &host, port, secure_port);

  let (fractional_incremental, mut forbidden_filtered) =
    resolve_fractional_list(record.get_one("replicated-attribute-list"), directory)?;
  let fractional_total = match record.get_one("replicated-attribute-list-total") {
    None => None,
    Some(raw) => {
      let (attrs, forbidden) = resolve_fractional_list(Some(raw), directory)?;
      forbidden_filtered.extend(forbidden);
      Some(attrs)
    }
  };

  let strip_attrs: Vec<String> = record
    .get_one("replica-strip-attrs")
    .map(|s| s.split_whitespace().map(str::to_string).collect())
    .unwrap_or_default();

  let long_name = format!(
    "agmt=\"{rdn}\" ({}:{port})",
    model::short_host(&host)
  );

  let fields = AgreementFields {
    identity: AgreementId::new(dn, rdn),
    long_name,
    session_prefix,
    session_counter: 1,

    remote_host: host,
    remote_port: port,
    transport,
    bind_method,
    bind_dn: record.get_one("replica-bind-dn").unwrap_or_default().to_string(),
    bind_credential: record
      .get_one("replica-credentials")
      .map(|s| s.as_bytes().to_vec())
      .unwrap_or_default(),

    bootstrap_transport,
    bootstrap_bind_method,
    bootstrap_bind_dn: record
      .get_one("replica-bootstrap-bind-dn")
      .unwrap_or_default()
      .to_string(),
    bootstrap_bind_credential: record
      .get_one("replica-bootstrap-credentials")
      .map(|s| s.as_bytes().to_vec())
      .unwrap_or_default(),

    replicated_subtree: subtree,
    strip_attrs,

    enabled: record
      .get_one("replica-enabled")
      .map(|v| !v.eq_ignore_ascii_case("off"))
      .unwrap_or(true),
    auto_initialize,

    timeout_seconds: record
      .get_one("replica-timeout")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    busy_wait_seconds: record
      .get_one("busy-wait-time")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_BUSY_WAIT_SECONDS),
    pause_seconds: record
      .get_one("session-pause-time")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_PAUSE_SECONDS),
    flow_window: record
      .get_one("flow-control-window")
      .and_then(|v| v.parse().ok())
      .unwrap_or(default_flow_window),
    flow_pause_ms: record
      .get_one("flow-control-pause")
      .and_then(|v| v.parse().ok())
      .unwrap_or(default_flow_pause),
    wait_async_ms: record
      .get_one("wait-for-async-results")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_WAIT_ASYNC_MS),
    ignore_missing: IgnoreMissing::from_str_opt(record.get_one("replica-ignore-missing-change")),

    consumer_ruv: ConsumerRuv::new(),
    consumer_schema_csn: None,
    consumer_rid: 0,
    rid_tentative: true,

    agreement_maxcsn: None,
    change_counters: ChangeCounters::new(),

    last_update: restore_status_slot(
      record.get_one("replica-last-update-start"),
      record.get_one("replica-last-update-end"),
      record.get_one("replica-last-update-status"),
    ),
    last_init: restore_status_slot(
      record.get_one("replica-last-init-start"),
      record.get_one("replica-last-init-end"),
      record.get_one("replica-last-init-status"),
    ),

    update_in_progress: false,
    stop_in_progress: false,

    agreement_type: AgreementType::MultiSupplier,
    protocol: None,
  };

  validator::validate(&fields)?;

  Ok(ParsedAgreement {
    fields,
    fractional: FractionalAttrs {
      incremental: fractional_incremental,
      total: fractional_total,
    },
    forbidden_attrs_filtered: forbidden_filtered,
  })
}

fn model_or_invalid<T>(value: Option<T>, field: &str) -> Result<T> {
  value.ok_or_else(|| {
    AgreementError::ConfigInvalid(crate::error::ValidationError::single(format!(
      "unrecognised value for '{field}'"
    )))
  })
}

/// Primary transport resolution (spec §4.2, §9 open question): an
/// unrecognised value is a no-op, leaving `current` unchanged, with a
/// diagnostic logged rather than surfaced as an error.
pub fn resolve_primary_transport(current: Transport, raw: Option<&str>) -> Transport {
  match Transport::from_str_opt(raw) {
    Some(t) => t,
    None => {
      warn!(
        "unrecognised transport-info value {:?}; leaving transport unchanged",
        raw
      );
      current
    }
  }
}

/// Bootstrap transport resolution: unlike the primary transport, an
/// unrecognised value is a hard error (spec §4.2, §9 open question).
pub fn resolve_bootstrap_transport(raw: Option<&str>) -> Result<Transport> {
  Transport::from_str_opt(raw).ok_or_else(|| {
    AgreementError::ConfigInvalid(crate::error::ValidationError::single(format!(
      "unrecognised bootstrap transport-info value {raw:?}"
    )))
  })
}

/// Parses and merges a fractional-attribute-list field: overlays the
/// process-wide default list (de-duplicated), then filters out forbidden
/// attributes, returning them separately (spec §4.2).
fn resolve_fractional_list(
  raw: Option<&str>,
  directory: &dyn Directory,
) -> Result<(Vec<String>, Vec<String>)> {
  let mut attrs = match raw {
    None => Vec::new(),
    Some(s) => match parse_fractional_list(s) {
      None => Vec::new(),
      Some(Ok(attrs)) => attrs,
      Some(Err(e)) => return Err(AgreementError::ConfigInvalid(crate::error::ValidationError::single(e))),
    },
  };

  for default_attr in directory.default_fractional_attrs() {
    if !attrs.iter().any(|a| a.eq_ignore_ascii_case(&default_attr)) {
      attrs.push(default_attr);
    }
  }

  let mut forbidden_filtered = Vec::new();
  attrs.retain(|a| {
    let is_forbidden = model::FORBIDDEN_FRACTIONAL_ATTRS
      .iter()
      .any(|f| f.eq_ignore_ascii_case(a));
    if is_forbidden {
      forbidden_filtered.push(a.clone());
    }
    !is_forbidden
  });

  Ok((attrs, forbidden_filtered))
}

/// Deterministic session prefix (spec §4.2): SHA-1 of
/// `subtree || host || port || secure_port`, base64-encoded, truncated so
/// the composite `"<prefix> NNN"` fits within a
/// [`SESSION_TAG_BUFFER_LEN`]-byte buffer. Falls back to `"dummyID"` if any
/// input is missing.
pub fn compute_session_prefix(subtree: &str, host: &str, port: u16, secure_port: u16) -> String {
  if subtree.is_empty() || host.is_empty() || port == 0 {
    return DUMMY_SESSION_PREFIX.to_string();
  }

  let mut hasher = Sha1::new();
  hasher.update(subtree.as_bytes());
  hasher.update(host.as_bytes());
  hasher.update(port.to_be_bytes());
  hasher.update(secure_port.to_be_bytes());
  let digest = hasher.finalize();

  let encoded = BASE64.encode(digest);

  // "<prefix> NNN" must fit in SESSION_TAG_BUFFER_LEN bytes; " NNN" is 4 bytes.
  let max_prefix_len = SESSION_TAG_BUFFER_LEN.saturating_sub(4);
  if encoded.len() > max_prefix_len {
    encoded[..max_prefix_len].to_string()
  } else {
    encoded
  }
}

fn restore_status_slot(start: Option<&str>, end: Option<&str>, human: Option<&str>) -> StatusSlot {
  StatusSlot {
    start: start.and_then(|v| v.parse().ok()),
    end: end.and_then(|v| v.parse().ok()),
    human: human.unwrap_or_default().to_string(),
    json: None,
  }
}
