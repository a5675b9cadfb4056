// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates stateward.yml and an example units file.

use std::path::Path;

use crate::error::{Error, Result};

use super::{CONFIG_FILENAME, DEFAULT_UNITS_FILE};

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, generate_template_yaml())?;

    let units_path = dir.join(DEFAULT_UNITS_FILE);
    if !units_path.exists() {
        std::fs::write(&units_path, generate_units_yaml())?;
    }

    Ok(())
}

fn generate_template_yaml() -> String {
    format!(
        r#"units_file: {DEFAULT_UNITS_FILE}

tool:
  program: terraform
  timeout: 30m
  init: true
  # var_file: terraform.tfvars
  # env:
  #   TF_TOKEN_app_terraform_io: {{ env: TF_TOKEN }}

execution:
  max_workers: 5
  lock_ttl: 5m
  store_timeout: 30s
  detect_legacy_shards: true

store:
  root: .stateward/store

audit:
  enabled: true
  prefix: audit
  trigger: {{ env: CI_PIPELINE_ID, default: manual }}

# policy:
#   command: [conftest, test, plan.json]
#   timeout: 5m

# destinations:
#   prod:
#     units_file: units.prod.yml
#     store:
#       root: /mnt/state/prod
"#
    )
}

fn generate_units_yaml() -> String {
    r#"units:
  - account: "123456789012"
    region: us-east-1
    project: payments
    services: [s3, kms]
    source: infra/payments/main.tf
"#
    .to_string()
}
