//! Validator (spec §4.1): pure, stateless checks of a candidate
//! [`AgreementFields`] value against the invariants of spec §3. Every rule
//! here is one of those invariants; no rule is encoded anywhere else.

use crate::{
  error::ValidationError,
  fields::AgreementFields,
  model::{BindMethod, Transport},
};

/// Validates `fields`, collecting every diagnostic rather than stopping at
/// the first one, so a single bad record produces one useful message.
pub fn validate(fields: &AgreementFields) -> Result<(), ValidationError> {
  let mut problems = Vec::new();

  if fields.transport == Transport::Plain && fields.bind_method == BindMethod::TlsClientCert {
    problems.push(
      "bind method 'tls-client-cert' requires a TLS transport, not plain LDAP".to_string(),
    );
  }

  if fields.bind_method.requires_credentials() {
    if fields.bind_dn.trim().is_empty() {
      problems.push(format!(
        "bind method {:?} requires a non-empty bind DN",
        fields.bind_method
      ));
    }
    if fields.bind_credential.is_empty() {
      problems.push(format!(
        "bind method {:?} requires bind credentials",
        fields.bind_method
      ));
    }
  }

  if fields.remote_port == 0 {
    problems.push("replica port must be in range 1..=65535".to_string());
  }

  if fields.session_counter == 0 || fields.session_counter > 999 {
    problems.push("session counter must be in range 1..=999".to_string());
  }

  if let Some(maxcsn) = &fields.agreement_maxcsn {
    if maxcsn.splitn(6, ';').count() != 6 {
      problems.push(format!(
        "agreement maxcsn '{maxcsn}' does not parse into six ';'-separated fields"
      ));
    }
  }

  if fields.replicated_subtree.trim().is_empty() {
    problems.push("replicated subtree must not be empty".to_string());
  }

  if problems.is_empty() {
    Ok(())
  } else {
    Err(ValidationError(problems))
  }
}
