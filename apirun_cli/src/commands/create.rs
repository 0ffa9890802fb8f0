use std::path::Path;

use apirun_core::config::MigrationConfig;
use apirun_core::error::ErrorKind;
use apirun_core::Result;
use chrono::Utc;

use crate::cli::CreateArgs;
use crate::pretty;

const TEMPLATE: &str = r#"up:
  name: describe what this step does
  request:
    method: POST
    url: https://example.com/resource
    headers:
      - name: Authorization
        value: "Bearer {{ auth.NAME }}"
    body: |
      {"key": "value"}
  response:
    result_code: [200, 201]
    env_from:
      - name: resource_id
        from: data.id

down:
  method: DELETE
  url: "https://example.com/resource/{{ resource_id }}"
  response:
    result_code: [200, 204]
"#;

/// Emits `NNNNNNNNNNNN_name.yaml` into the configured migrate dir, prefixed
/// with a millisecond timestamp so sequential `create` calls always sort
/// after one another.
pub async fn run(args: &CreateArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let config = MigrationConfig::load(config_path)?;
    let migrate_dir = config.migrate_dir(config_path);
    std::fs::create_dir_all(&migrate_dir)
        .map_err(|e| ErrorKind::Config(format!("could not create migrate dir '{}': {}", migrate_dir.display(), e)))?;

    let safe_name: String =
        args.name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' }).collect();
    let prefix = Utc::now().timestamp_millis();
    let filename = format!("{:012}_{}.yaml", prefix, safe_name);
    let path = migrate_dir.join(&filename);

    std::fs::write(&path, TEMPLATE)
        .map_err(|e| ErrorKind::Config(format!("could not write '{}': {}", path.display(), e)))?;

    pretty::ok(&format!("created {}", path.display()));
    Ok(())
}
