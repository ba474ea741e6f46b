//! Migration files
//!
//! One TOML file per migration, named `NNN_snake_name.toml`:
//!
//! ```toml
//! description = "Core registries"
//!
//! [[steps]]
//! action = "deploy"
//! contract = "AddyRegistry"
//! args = ["@deployer"]
//!
//! [[steps]]
//! action = "execute"
//! contract = "AddyRegistry"
//! function = "registerNewAddy"
//! args = ["@LegoRegistry", "Lego Registry"]
//! ```

use super::DeployError;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MIGRATION_FILE_PATTERN: &str = r"^(\d+)_([a-z0-9_]+)\.toml$";

/// A single migration step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Step {
    /// Deploy an artifact and record it in the manifest under `as` (or the artifact name)
    Deploy {
        contract: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        replace: bool,
    },
    /// Send a state-changing transaction to a deployed contract
    Execute {
        contract: String,
        function: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Read-only call whose decoded result must equal `expect`
    Check {
        contract: String,
        function: String,
        #[serde(default)]
        args: Vec<Value>,
        expect: Value,
    },
}

impl Step {
    /// Name the contract is recorded under (deploy) or looked up by (execute/check)
    pub fn target(&self) -> &str {
        match self {
            Step::Deploy { contract, alias, .. } => alias.as_deref().unwrap_or(contract),
            Step::Execute { contract, .. } | Step::Check { contract, .. } => contract,
        }
    }

    /// One-line description for logs
    pub fn describe(&self) -> String {
        match self {
            Step::Deploy { contract, alias: Some(alias), .. } => format!("deploy {} as {}", contract, alias),
            Step::Deploy { contract, .. } => format!("deploy {}", contract),
            Step::Execute { contract, function, .. } => format!("execute {}.{}", contract, function),
            Step::Check { contract, function, .. } => format!("check {}.{}", contract, function),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MigrationFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub number: u32,
    pub name: String,
    pub path: PathBuf,
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl Migration {
    /// `NNN_name` as used in logs and error messages
    pub fn id(&self) -> String {
        format!("{:03}_{}", self.number, self.name)
    }

    /// Parse a migration from file name and TOML content
    pub fn parse(number: u32, name: &str, path: &Path, content: &str) -> Result<Self, DeployError> {
        let file: MigrationFile = toml::from_str(content).map_err(|e| DeployError::InvalidMigration {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            number,
            name: name.to_string(),
            path: path.to_path_buf(),
            description: file.description,
            steps: file.steps,
        })
    }
}

/// Load every migration in `dir`, sorted by number.
/// Files that don't match `NNN_snake_name.toml` are skipped with a warning.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>, DeployError> {
    if !dir.is_dir() {
        return Err(DeployError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("migrations directory {} not found", dir.display()),
        )));
    }

    let file_re = Regex::new(MIGRATION_FILE_PATTERN).map_err(|e| DeployError::InvalidMigration {
        file: MIGRATION_FILE_PATTERN.to_string(),
        reason: e.to_string(),
    })?;

    let pattern = dir.join("*.toml");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| DeployError::InvalidMigration {
        file: pattern.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut migrations: BTreeMap<u32, Migration> = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(|e| DeployError::Io(e.into_error()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let Some(caps) = file_re.captures(&file_name) else {
            log::warn!("[deploy] Ignoring {} (expected NNN_snake_name.toml)", path.display());
            continue;
        };
        let number: u32 = caps[1].parse().map_err(|_| DeployError::InvalidMigration {
            file: file_name.clone(),
            reason: "migration number out of range".to_string(),
        })?;
        if migrations.contains_key(&number) {
            return Err(DeployError::DuplicateMigration(number));
        }

        let content = std::fs::read_to_string(&path)?;
        let migration = Migration::parse(number, &caps[2], &path, &content)?;
        migrations.insert(number, migration);
    }

    log::debug!("[deploy] Loaded {} migrations from {}", migrations.len(), dir.display());
    Ok(migrations.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const CORE_MIGRATION: &str = r#"
description = "Core registries"

[[steps]]
action = "deploy"
contract = "AddyRegistry"
args = ["@deployer"]

[[steps]]
action = "deploy"
contract = "AddyRegistry"
as = "BackupRegistry"
replace = true

[[steps]]
action = "execute"
contract = "AddyRegistry"
function = "registerNewAddy"
args = ["@BackupRegistry", "Backup"]

[[steps]]
action = "check"
contract = "AddyRegistry"
function = "numAddys"
expect = 1
"#;

    #[test]
    fn test_parse_steps() {
        let migration = Migration::parse(1, "core", Path::new("001_core.toml"), CORE_MIGRATION).unwrap();
        assert_eq!(migration.id(), "001_core");
        assert_eq!(migration.description.as_deref(), Some("Core registries"));
        assert_eq!(migration.steps.len(), 4);

        assert_eq!(
            migration.steps[1],
            Step::Deploy {
                contract: "AddyRegistry".to_string(),
                alias: Some("BackupRegistry".to_string()),
                args: vec![],
                replace: true,
            }
        );
        assert_eq!(migration.steps[1].target(), "BackupRegistry");
        assert_eq!(migration.steps[2].describe(), "execute AddyRegistry.registerNewAddy");
        match &migration.steps[3] {
            Step::Check { expect, args, .. } => {
                assert_eq!(expect, &json!(1));
                assert!(args.is_empty());
            }
            other => panic!("expected check, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_is_invalid() {
        let content = "[[steps]]\naction = \"selfdestruct\"\ncontract = \"X\"\n";
        let err = Migration::parse(2, "bad", Path::new("002_bad.toml"), content).unwrap_err();
        assert!(matches!(err, DeployError::InvalidMigration { .. }));
    }

    #[test]
    fn test_load_migrations_sorts_and_skips_strays() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("010_later.toml"), "").unwrap();
        fs::write(dir.path().join("002_core.toml"), CORE_MIGRATION).unwrap();
        fs::write(dir.path().join("notes.toml"), "").unwrap();
        fs::write(dir.path().join("003_Bad-Name.toml"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();

        let migrations = load_migrations(dir.path()).unwrap();
        let ids: Vec<String> = migrations.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["002_core", "010_later"]);
        assert!(migrations[1].steps.is_empty());
    }

    #[test]
    fn test_duplicate_numbers_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("001_a.toml"), "").unwrap();
        fs::write(dir.path().join("1_b.toml"), "").unwrap();

        assert!(matches!(
            load_migrations(dir.path()),
            Err(DeployError::DuplicateMigration(1))
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_migrations(&dir.path().join("nope")),
            Err(DeployError::Io(_))
        ));
    }
}
