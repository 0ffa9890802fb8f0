//! Migration file model and discovery.
//!
//! A plain `serde`-derived type with `deny_unknown_fields` and doc comments
//! that double as the YAML reference, discovered from disk with `walkdir`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::ErrorKind;
use crate::Result;

/// One `{name, value}` pair as used for both headers and query params.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

/// `request:` block of a step.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<NameValue>,
    #[serde(default)]
    pub queries: Vec<NameValue>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_from_file: Option<String>,
    #[serde(default)]
    pub auth_name: Option<String>,
}

/// Env extraction rule. `from` is selector-dialect-specific: a leading
/// `header:` picks it apart as a response header read, anything else is
/// treated as a dotted JSON path read from the response body.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvFrom {
    pub name: String,
    pub from: String,
}

/// What happens when an `env_from` selector does not match.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvMissingPolicy {
    #[default]
    Skip,
    Fail,
}

/// `result_code` entries may be written as either a bare int or a string in
/// YAML; both are normalized to strings for comparison against the response
/// status code.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResultCode {
    Int(u16),
    Str(String),
}

impl ResultCode {
    pub fn as_str(&self) -> String {
        match self {
            ResultCode::Int(i) => i.to_string(),
            ResultCode::Str(s) => s.clone(),
        }
    }
}

/// `response:` block of a step.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Response {
    #[serde(default)]
    pub result_code: Vec<ResultCode>,
    #[serde(default)]
    pub env_from: Vec<EnvFrom>,
    #[serde(default)]
    pub env_missing: EnvMissingPolicy,
    #[serde(default)]
    pub save_response_body: bool,
}

/// Optional pre-request that runs before the main request renders, so the
/// main request can reference whatever it extracted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Find {
    pub request: Request,
    pub response: FindResponse,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindResponse {
    #[serde(default)]
    pub result_code: Vec<ResultCode>,
    #[serde(default)]
    pub env_from: Vec<EnvFrom>,
    #[serde(default)]
    pub env_missing: EnvMissingPolicy,
}

/// A single HTTP exchange with validation and env-extraction (Glossary: Step).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    pub request: Request,
    #[serde(default)]
    pub response: Response,
    #[serde(default)]
    pub find: Option<Find>,
    #[serde(default)]
    pub render_body: Option<bool>,
}

/// Raw top-level shape of a migration file: `up` is required, `down` is
/// optional, and may be given either as a full `Step` or the flat shorthand.
#[derive(Debug, Clone, Deserialize)]
struct RawMigrationFile {
    up: Step,
    #[serde(default)]
    down: Option<serde_yaml::Value>,
}

/// A fully parsed `NNN_name.yaml` (Glossary: Migration).
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub version: u64,
    pub filename: String,
    pub up: Step,
    pub down: Option<Step>,
}

fn filename_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)_[^.]+\.(ya?ml)$").expect("static regex"))
}

/// The down-step shorthand has no `request:`/`response:` wrapping; coerce it
/// into the full `Step` shape before decoding normally.
fn normalize_down(raw: serde_yaml::Value) -> Result<Step> {
    if let serde_yaml::Value::Mapping(ref map) = raw {
        let has_request = map.contains_key(serde_yaml::Value::String("request".into()));
        if !has_request {
            let mut wrapped = serde_yaml::Mapping::new();
            wrapped.insert(serde_yaml::Value::String("request".into()), raw.clone());
            let step: Step = serde_yaml::from_value(serde_yaml::Value::Mapping(wrapped))
                .map_err(|e| ErrorKind::Discovery(format!("invalid down shorthand: {}", e)))?;
            return Ok(step);
        }
    }
    serde_yaml::from_value(raw).map_err(|e| ErrorKind::Discovery(format!("invalid down step: {}", e)).into())
}

fn parse_file(path: &Path, filename: &str) -> Result<MigrationFile> {
    let caps = filename_re()
        .captures(filename)
        .ok_or_else(|| ErrorKind::Discovery(format!("filename '{}' does not match NNN_name.yaml", filename)))?;
    let version: u64 = caps[1]
        .parse()
        .map_err(|_| ErrorKind::Discovery(format!("version in '{}' is not a valid integer", filename)))?;

    let contents = std::fs::read_to_string(path)
        .map_err(|e| ErrorKind::Discovery(format!("could not read '{}': {}", filename, e)))?;
    let raw: RawMigrationFile = serde_yaml::from_str(&contents)
        .map_err(|e| ErrorKind::Discovery(format!("could not parse '{}': {}", filename, e)))?;

    let down = raw.down.map(normalize_down).transpose()?;

    Ok(MigrationFile { version, filename: filename.to_string(), up: raw.up, down })
}

/// Walk the migrate dir (non-recursive) and parse every file matching the
/// filename regex, enforcing version uniqueness.
pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut entries: Vec<(String, PathBuf)> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.file_name().to_str().map(|name| (name.to_string(), e.path().to_path_buf()))
        })
        .filter(|(name, _)| filename_re().is_match(name))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut files = Vec::with_capacity(entries.len());
    let mut seen_versions: HashSet<u64> = HashSet::new();
    let mut duplicates: std::collections::HashMap<u64, Vec<String>> = std::collections::HashMap::new();

    for (name, path) in &entries {
        let file = parse_file(path, name)?;
        duplicates.entry(file.version).or_default().push(file.filename.clone());
        if !seen_versions.insert(file.version) {
            // fall through to the aggregate duplicate error below
        }
        files.push(file);
    }

    if let Some((version, names)) = duplicates.iter().find(|(_, names)| names.len() > 1) {
        return Err(ErrorKind::Discovery(format!(
            "duplicate version {} across files: {}",
            version,
            names.join(", ")
        ))
        .into());
    }

    files.sort_by_key(|f| f.version);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    const SIMPLE_UP: &str = r#"
up:
  name: create thing
  request:
    method: POST
    url: http://example.com/things
  response:
    result_code: [200, 201]
down:
  method: DELETE
  url: http://example.com/things/1
"#;

    #[test]
    fn discovers_and_sorts_by_version() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "002_second.yaml", SIMPLE_UP);
        write_file(dir.path(), "001_first.yaml", SIMPLE_UP);
        write_file(dir.path(), "README.md", "not a migration");

        let files = discover(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].version, 1);
        assert_eq!(files[1].version, 2);
        assert!(files[0].down.is_some());
    }

    #[test]
    fn duplicate_version_is_a_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "004_first.yaml", SIMPLE_UP);
        write_file(dir.path(), "004_second.yaml", SIMPLE_UP);

        let err = discover(dir.path()).unwrap_err();
        match err.kind() {
            ErrorKind::Discovery(msg) => {
                assert!(msg.contains("004_first.yaml"));
                assert!(msg.contains("004_second.yaml"));
            }
            other => panic!("expected Discovery error, got {:?}", other),
        }
    }

    #[test]
    fn down_shorthand_is_normalized_into_a_full_step() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "001_first.yaml", SIMPLE_UP);
        let files = discover(dir.path()).unwrap();
        let down = files[0].down.as_ref().unwrap();
        assert_eq!(down.request.method, "DELETE");
    }
}
