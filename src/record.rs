//! The configuration-record shape consumed by [`crate::parser::parse`]
//! (spec §4.2, §6) and the fractional-attribute-list grammar.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgreementError, Result};

/// A configuration entry: a mapping from attribute name to one or more
/// values, exactly as the directory would hand it to the engine (spec §4.2).
///
/// Multi-valued attributes keep every value; single-valued lookups use the
/// first. Attribute names are matched case-insensitively, as LDAP attribute
/// names are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgreementRecord {
  attrs: HashMap<String, Vec<String>>,
}

impl AgreementRecord {
  pub fn new() -> Self {
    AgreementRecord::default()
  }

  /// Builds a record from `(attribute, value)` pairs, the shape test
  /// fixtures and the scenarios of spec §8 use.
  pub fn from_pairs<I, K, V>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let mut record = AgreementRecord::new();
    for (k, v) in pairs {
      record.push(k, v);
    }
    record
  }

  /// Appends a value to `name`, preserving any values already present.
  pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self
      .attrs
      .entry(name.into().to_ascii_lowercase())
      .or_default()
      .push(value.into());
    self
  }

  /// Replaces all values of `name` with the single `value`.
  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self
      .attrs
      .insert(name.into().to_ascii_lowercase(), vec![value.into()]);
    self
  }

  pub fn get_one(&self, name: &str) -> Option<&str> {
    self
      .attrs
      .get(&name.to_ascii_lowercase())
      .and_then(|v| v.first())
      .map(|s| s.as_str())
  }

  pub fn get_all(&self, name: &str) -> &[String] {
    self
      .attrs
      .get(&name.to_ascii_lowercase())
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Loads a set of records from TOML, the shape used by local test fixtures
  /// (SPEC_FULL §10.4). Expected form: a top-level array of tables, each
  /// table's keys and values becoming attribute/value pairs (string or array
  /// of strings).
  pub fn load_toml_set(input: &str) -> Result<Vec<AgreementRecord>> {
    let parsed: toml::Value = toml::from_str(input)
      .map_err(|e| AgreementError::DirectoryIo(format!("invalid TOML fixture: {e}")))?;
    let table = parsed
      .get("agreement")
      .and_then(|v| v.as_array())
      .ok_or_else(|| {
        AgreementError::DirectoryIo("TOML fixture missing `[[agreement]]` entries".to_string())
      })?;
    let mut records = Vec::with_capacity(table.len());
    for entry in table {
      let mut record = AgreementRecord::new();
      let map = entry.as_table().ok_or_else(|| {
        AgreementError::DirectoryIo("agreement fixture entry must be a table".to_string())
      })?;
      for (key, value) in map {
        match value {
          toml::Value::String(s) => {
            record.set(key, s.clone());
          }
          toml::Value::Array(values) => {
            for v in values {
              if let Some(s) = v.as_str() {
                record.push(key, s.to_string());
              }
            }
          }
          other => {
            record.set(key, other.to_string());
          }
        }
      }
      records.push(record);
    }
    Ok(records)
  }
}

/// Parses a fractional-attribute-list string of the form
/// `"(objectclass=*) $ EXCLUDE <attr> [<attr>...]"` (spec §4.2).
///
/// The leading filter must match exactly and the `$ EXCLUDE` literal is
/// required; attribute names are space-separated. Returns `None` if the
/// input does not match the grammar at all (treated as "not configured"),
/// or `Some(Err)` if it starts correctly but is malformed.
pub fn parse_fractional_list(input: &str) -> Option<std::result::Result<Vec<String>, String>> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return None;
  }
  const PREFIX: &str = "(objectclass=*)";
  if !trimmed.starts_with(PREFIX) {
    return Some(Err(format!(
      "fractional attribute list must start with '{PREFIX}'"
    )));
  }
  let rest = trimmed[PREFIX.len()..].trim_start();
  const EXCLUDE: &str = "$ EXCLUDE";
  if !rest.starts_with(EXCLUDE) {
    return Some(Err(format!(
      "fractional attribute list must contain '{EXCLUDE}'"
    )));
  }
  let attrs: Vec<String> = rest[EXCLUDE.len()..]
    .split_whitespace()
    .map(|s| s.to_string())
    .collect();
  if attrs.is_empty() {
    return Some(Err(
      "fractional attribute list names no attributes after EXCLUDE".to_string(),
    ));
  }
  Some(Ok(attrs))
}

/// Renders a fractional-attribute list back into the grammar of
/// [`parse_fractional_list`], for round-tripping through getters.
pub fn render_fractional_list(attrs: &[String]) -> String {
  if attrs.is_empty() {
    return String::new();
  }
  format!("(objectclass=*) $ EXCLUDE {}", attrs.join(" "))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_get_one_and_all() {
    let mut r = AgreementRecord::new();
    r.push("replica-host", "h1");
    r.push("replicated-attribute-list", "a");
    r.push("replicated-attribute-list", "b");
    assert_eq!(r.get_one("replica-host"), Some("h1"));
    assert_eq!(r.get_one("REPLICA-HOST"), Some("h1"));
    assert_eq!(r.get_all("replicated-attribute-list"), &["a", "b"]);
    assert_eq!(r.get_one("missing"), None);
  }

  #[test]
  fn fractional_grammar_happy_path() {
    let parsed = parse_fractional_list("(objectclass=*) $ EXCLUDE jpegPhoto mail").unwrap();
    assert_eq!(parsed.unwrap(), vec!["jpegPhoto", "mail"]);
  }

  #[test]
  fn fractional_grammar_missing_filter() {
    let parsed = parse_fractional_list("$ EXCLUDE jpegPhoto").unwrap();
    assert!(parsed.is_err());
  }

  #[test]
  fn fractional_grammar_missing_exclude() {
    let parsed = parse_fractional_list("(objectclass=*) jpegPhoto").unwrap();
    assert!(parsed.is_err());
  }

  #[test]
  fn fractional_grammar_empty_is_not_configured() {
    assert!(parse_fractional_list("").is_none());
    assert!(parse_fractional_list("   ").is_none());
  }

  #[test]
  fn fractional_round_trips() {
    let attrs = vec!["jpegPhoto".to_string(), "mail".to_string()];
    let rendered = render_fractional_list(&attrs);
    let parsed = parse_fractional_list(&rendered).unwrap().unwrap();
    assert_eq!(parsed, attrs);
  }
}
