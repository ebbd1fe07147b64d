use super::WorkspaceConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file names, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &["stackup.yaml", "stackup.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find stackup.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load and validate config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<WorkspaceConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    pub fn parse_config(&self, content: &str) -> Result<WorkspaceConfig> {
        let config: WorkspaceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_config_in_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stackup.yml"), "repos: {}\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join("stackup.yml"));
    }

    #[test]
    fn parse_config_validates() {
        let err = Parser::new()
            .parse_config("options:\n  concurrency: 0\n")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn empty_document_is_an_empty_workspace() {
        let config = Parser::new().parse_config("{}").unwrap();
        assert!(config.repos.is_empty());
        assert!(config.infra.is_empty());
    }
}
