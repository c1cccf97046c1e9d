//! Field types shared by the parser, validator and store.

use std::fmt;

/// Attribute names that must never appear in a fractional-attribute list,
/// even if an administrator requests them (spec §4.2).
pub const FORBIDDEN_FRACTIONAL_ATTRS: &[&str] = &[
  "nsuniqueid",
  "modifiersname",
  "lastmodifiedtime",
  "dc",
  "o",
  "ou",
  "cn",
  "objectclass",
];

/// Upper bound on the number of distinct remote replica ids a single
/// agreement tracks change counters for before the list must grow past its
/// initial capacity (spec §4.3).
pub const MAX_SUPPLIERS: usize = 32;

static_assertions::const_assert!(MAX_SUPPLIERS > 0);

pub const DEFAULT_TIMEOUT_SECONDS: u32 = 120;
pub const DEFAULT_BUSY_WAIT_SECONDS: u32 = 0;
pub const DEFAULT_PAUSE_SECONDS: u32 = 0;
pub const DEFAULT_WAIT_ASYNC_MS: u32 = 100;

/// Flow-control defaults, selected per spec §3 by asking the Directory
/// collaborator which backend flavor hosts the replicated subtree.
pub const LMDB_FLOW_WINDOW: u32 = 50;
pub const LMDB_FLOW_PAUSE_MS: u32 = 200;
pub const DEFAULT_FLOW_WINDOW: u32 = 1000;
pub const DEFAULT_FLOW_PAUSE_MS: u32 = 2000;

pub const SESSION_TAG_BUFFER_LEN: usize = 64;
pub const DUMMY_SESSION_PREFIX: &str = "dummyID";

/// Backend flavor hosting a subtree, as reported by the Directory
/// collaborator. Only used to pick flow-control defaults (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFlavor {
  Lmdb,
  Other,
}

/// Outbound transport for the primary or bootstrap connection (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
  Plain,
  ImplicitTls,
  StartTls,
}

impl Transport {
  /// Maps `transport-info` values per spec §4.2. Returns `None` when the
  /// value is not recognised; the caller decides whether that is a no-op
  /// (primary transport) or a hard error (bootstrap transport).
  pub fn from_str_opt(value: Option<&str>) -> Option<Transport> {
    match value {
      None => Some(Transport::Plain),
      Some(v) => match v.to_ascii_uppercase().as_str() {
        "LDAP" => Some(Transport::Plain),
        "SSL" | "LDAPS" => Some(Transport::ImplicitTls),
        "TLS" | "STARTTLS" => Some(Transport::StartTls),
        _ => None,
      },
    }
  }
}

impl fmt::Display for Transport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Transport::Plain => "LDAP",
      Transport::ImplicitTls => "SSL",
      Transport::StartTls => "StartTLS",
    };
    write!(f, "{s}")
  }
}

/// Authentication method for the primary bind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMethod {
  Simple,
  TlsClientCert,
  SaslGssapi,
  SaslDigestMd5,
}

impl BindMethod {
  pub fn from_str_opt(value: Option<&str>) -> Option<BindMethod> {
    match value {
      None => Some(BindMethod::Simple),
      Some(v) => match v.to_ascii_uppercase().as_str() {
        "SIMPLE" => Some(BindMethod::Simple),
        "SSLCLIENTAUTH" => Some(BindMethod::TlsClientCert),
        "SASL/GSSAPI" => Some(BindMethod::SaslGssapi),
        "SASL/DIGEST-MD5" => Some(BindMethod::SaslDigestMd5),
        _ => None,
      },
    }
  }

  /// Whether this method requires `bind_dn`/`bind_credential` to be set
  /// (spec §3 invariant).
  pub fn requires_credentials(&self) -> bool {
    matches!(self, BindMethod::Simple | BindMethod::SaslDigestMd5)
  }
}

/// Authentication method for the bootstrap bind, a restricted subset of
/// [`BindMethod`] (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapBindMethod {
  Simple,
  TlsClientCert,
}

impl BootstrapBindMethod {
  pub fn from_str_opt(value: Option<&str>) -> Option<BootstrapBindMethod> {
    match value {
      None => Some(BootstrapBindMethod::Simple),
      Some(v) => match v.to_ascii_uppercase().as_str() {
        "SIMPLE" => Some(BootstrapBindMethod::Simple),
        "SSLCLIENTAUTH" => Some(BootstrapBindMethod::TlsClientCert),
        _ => None,
      },
    }
  }

  pub fn to_bind_method(self) -> BindMethod {
    match self {
      BootstrapBindMethod::Simple => BindMethod::Simple,
      BootstrapBindMethod::TlsClientCert => BindMethod::TlsClientCert,
    }
  }
}

/// Tri-state handling of missing changelog entries (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreMissing {
  Never,
  Once,
  Always,
}

impl IgnoreMissing {
  pub fn from_str_opt(value: Option<&str>) -> IgnoreMissing {
    match value.map(|v| v.to_ascii_lowercase()) {
      None => IgnoreMissing::Never,
      Some(v) => match v.as_str() {
        "off" | "never" => IgnoreMissing::Never,
        "on" | "once" => IgnoreMissing::Once,
        "always" => IgnoreMissing::Always,
        _ => IgnoreMissing::Never,
      },
    }
  }
}

/// Initial protocol state selected at agreement creation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoInitialize {
  Incremental,
  Total,
}

/// Discriminated agreement variant (spec §3). The Windows-sync branch is
/// referenced only as a discriminator; its behavior is an external
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementType {
  MultiSupplier,
  Windows,
}

/// Stable identity of an agreement: its distinguished name and terminal
/// (RDN) component (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgreementId {
  pub dn: String,
  pub rdn: String,
}

impl AgreementId {
  pub fn new(dn: impl Into<String>, rdn: impl Into<String>) -> Self {
    AgreementId {
      dn: dn.into(),
      rdn: rdn.into(),
    }
  }
}

impl fmt::Display for AgreementId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.dn)
  }
}

/// A single local-write operation kind, as seen by `notify_change` /
/// `update_maxcsn` (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
  Add,
  Delete,
  Modify,
  ModRdn,
}

/// One pending modification within a `Modify` operation: the attribute being
/// touched (spec §4.5 fractional/strip filtering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
  pub attribute: String,
}

impl Mod {
  pub fn new(attribute: impl Into<String>) -> Self {
    Mod {
      attribute: attribute.into(),
    }
  }
}

/// A pending local-write change handed to `notify_change` / `update_maxcsn`.
#[derive(Debug, Clone)]
pub struct Change {
  pub dn: String,
  pub op: OperationKind,
  pub mods: Vec<Mod>,
  pub csn: String,
}

/// Short-host computation used for `long_name` (spec §4.2): the host name up
/// to (not including) its first dot.
pub fn short_host(host: &str) -> &str {
  host.split('.').next().unwrap_or(host)
}
