//! `env_from` extraction pipeline.
//!
//! The selector dialect is left open for an implementation to define; this
//! picks three concrete forms, a header lookup and a JSON path walk plus a
//! regex escape hatch:
//!
//! - `header:Name` reads a response header verbatim.
//! - `regex:<pattern>` applies `pattern` to the raw response body and
//!   returns the first capture group (or the whole match with no groups).
//! - anything else is a dotted JSON path (`data.id`, `items.0.token`) read
//!   from the response body.

use regex::Regex;
use serde_json::Value;

use crate::migration::EnvFrom;
use crate::Result;

pub struct Extracted {
    pub name: String,
    pub value: Option<String>,
}

fn json_path(body: &Value, path: &str) -> Option<String> {
    let mut cur = body;
    for part in path.split('.') {
        cur = if let Ok(idx) = part.parse::<usize>() {
            cur.get(idx)?
        } else {
            cur.get(part)?
        };
    }
    match cur {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn extract_one(rule: &EnvFrom, headers: &reqwest::header::HeaderMap, body_text: &str, body_json: &Option<Value>) -> Option<String> {
    if let Some(header_name) = rule.from.strip_prefix("header:") {
        return headers.get(header_name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    }
    if let Some(pattern) = rule.from.strip_prefix("regex:") {
        let re = Regex::new(pattern).ok()?;
        let caps = re.captures(body_text)?;
        return caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().to_string());
    }
    json_path(body_json.as_ref()?, &rule.from)
}

/// Run every `env_from` rule against one response. A selector miss is
/// `None`; the caller enforces `env_missing` policy.
pub fn extract(
    rules: &[EnvFrom],
    headers: &reqwest::header::HeaderMap,
    body_text: &str,
) -> Vec<Extracted> {
    let body_json: Option<Value> = serde_json::from_str(body_text).ok();
    rules
        .iter()
        .map(|rule| Extracted {
            name: rule.name.clone(),
            value: extract_one(rule, headers, body_text, &body_json),
        })
        .collect()
}

/// Apply `env_missing` policy; returns `Err` for the first failing rule
/// when `fail`, or silently omits misses when `skip`.
pub fn apply_missing_policy(
    extracted: Vec<Extracted>,
    policy: crate::migration::EnvMissingPolicy,
) -> Result<std::collections::HashMap<String, String>> {
    use crate::error::ErrorKind;
    use crate::migration::EnvMissingPolicy;

    let mut out = std::collections::HashMap::new();
    for item in extracted {
        match item.value {
            Some(v) => {
                out.insert(item.name, v);
            }
            None if policy == EnvMissingPolicy::Fail => {
                return Err(ErrorKind::Extraction(item.name, "selector did not match".into()).into());
            }
            None => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::EnvMissingPolicy;

    #[test]
    fn reads_simple_json_field() {
        let rules = vec![EnvFrom { name: "id".into(), from: "data.id".into() }];
        let headers = reqwest::header::HeaderMap::new();
        let body = r#"{"data": {"id": "abc-123"}}"#;
        let extracted = extract(&rules, &headers, body);
        assert_eq!(extracted[0].value.as_deref(), Some("abc-123"));
    }

    #[test]
    fn reads_simple_header() {
        let rules = vec![EnvFrom { name: "loc".into(), from: "header:Location".into() }];
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("location", "https://example.com/things/1".parse().unwrap());
        let extracted = extract(&rules, &headers, "");
        assert_eq!(extracted[0].value.as_deref(), Some("https://example.com/things/1"));
    }

    #[test]
    fn fail_policy_errors_on_miss() {
        let rules = vec![EnvFrom { name: "missing".into(), from: "nope".into() }];
        let headers = reqwest::header::HeaderMap::new();
        let extracted = extract(&rules, &headers, "{}");
        let err = apply_missing_policy(extracted, EnvMissingPolicy::Fail).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Extraction(_, _)));
    }

    #[test]
    fn skip_policy_omits_miss() {
        let rules = vec![EnvFrom { name: "missing".into(), from: "nope".into() }];
        let headers = reqwest::header::HeaderMap::new();
        let extracted = extract(&rules, &headers, "{}");
        let out = apply_missing_policy(extracted, EnvMissingPolicy::Skip).unwrap();
        assert!(out.is_empty());
    }
}
