//! Settings alias table.
//!
//! Deployments name their configuration sets with short labels; the alias
//! table maps a label to a `(set, version)` pair and the filesystem path
//! the set's files live under. The table is a TOML document:
//!
//! ```toml
//! [default]
//! set = "Default"
//! version = "1.3"
//!
//! [m2-tests]
//! set = "M2"
//! version = "test"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Base directory configuration sets are deployed under.
const DEFAULT_ROOT: &str = "/Sets";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot parse alias file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown alias '{label}'")]
    UnknownAlias { label: String },
}

#[derive(Deserialize)]
struct AliasEntry {
    set: String,
    version: String,
}

/// Label to `(set, version)` alias map.
pub struct Alias {
    aliases: HashMap<String, (String, String)>,
    root: PathBuf,
}

impl Alias {
    /// Load an alias table from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse an alias table from TOML text.
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let entries: HashMap<String, AliasEntry> = toml::from_str(text)?;
        Ok(Self {
            aliases: entries
                .into_iter()
                .map(|(label, entry)| (label, (entry.set, entry.version)))
                .collect(),
            root: PathBuf::from(DEFAULT_ROOT),
        })
    }

    /// Override the base directory used by [`Alias::get_path`].
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
    }

    /// Resolve a label into its `(set, version)` pair. A label containing
    /// a comma is split in place instead of consulting the table, so
    /// callers can pass an explicit `set,version` everywhere a label is
    /// accepted.
    pub fn get_alias(&self, label: &str) -> Result<(String, String), SettingsError> {
        if let Some((set, version)) = label.split_once(',') {
            return Ok((set.to_string(), version.to_string()));
        }
        self.aliases
            .get(label)
            .cloned()
            .ok_or_else(|| SettingsError::UnknownAlias {
                label: label.to_string(),
            })
    }

    /// Filesystem path of the configuration set the label resolves to.
    pub fn get_path(&self, label: &str) -> Result<PathBuf, SettingsError> {
        let (set, version) = self.get_alias(label)?;
        Ok(self.root.join(set).join(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
[default]
set = "Default"
version = "1.3"

[m2-tests]
set = "M2"
version = "test"
"#;

    #[test]
    fn lookup() {
        let alias = Alias::parse(TABLE).unwrap();
        assert_eq!(
            alias.get_alias("default").unwrap(),
            ("Default".to_string(), "1.3".to_string())
        );
        assert_eq!(
            alias.get_path("m2-tests").unwrap(),
            PathBuf::from("/Sets/M2/test")
        );
    }

    #[test]
    fn comma_label_bypasses_table() {
        let alias = Alias::parse(TABLE).unwrap();
        assert_eq!(
            alias.get_alias("Custom,2.0").unwrap(),
            ("Custom".to_string(), "2.0".to_string())
        );
    }

    #[test]
    fn unknown_label_fails() {
        let alias = Alias::parse(TABLE).unwrap();
        assert!(matches!(
            alias.get_alias("nope"),
            Err(SettingsError::UnknownAlias { .. })
        ));
    }

    #[test]
    fn custom_root() {
        let mut alias = Alias::parse(TABLE).unwrap();
        alias.set_root("/data/config");
        assert_eq!(
            alias.get_path("default").unwrap(),
            PathBuf::from("/data/config/Default/1.3")
        );
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join("ilcbus_alias_test.toml");
        std::fs::write(&path, TABLE).unwrap();

        let alias = Alias::load(&path).unwrap();
        assert_eq!(
            alias.get_alias("m2-tests").unwrap(),
            ("M2".to_string(), "test".to_string())
        );

        std::fs::remove_file(&path).unwrap();
    }
}
