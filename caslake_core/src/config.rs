//! Lake directory configuration.
//!
//! A local lake is a directory holding a `config` file, the object store
//! directory and the SQLite catalog. The config is plain `key=value` lines:
//!
//! ```text
//! version=1
//! hash=sha256
//! store=store
//! catalog=catalog.sqlite
//! table=entries
//! unique=name
//! ```

use crate::error::{Error, Result};
use crate::hash::Algorithm;
use crate::query::validate_identifier;
use std::fs;
use std::path::Path;

/// Name of the config file inside a lake root.
pub const CONFIG_FILE: &str = "config";

const CONFIG_VERSION: &str = "1";

/// Settings for a local lake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LakeConfig {
    pub algorithm: Algorithm,
    /// Object directory, relative to the lake root.
    pub store_dir: String,
    /// SQLite file, relative to the lake root.
    pub catalog_file: String,
    /// Catalog table name.
    pub table: String,
    /// Caller fields that must be unique across the catalog.
    pub unique_fields: Vec<String>,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            store_dir: "store".to_string(),
            catalog_file: "catalog.sqlite".to_string(),
            table: "entries".to_string(),
            unique_fields: Vec::new(),
        }
    }
}

impl LakeConfig {
    /// Parse config file content.
    ///
    /// `version` and `hash` are required; everything else falls back to the
    /// defaults. Blank lines and `#` comments are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut version = None;
        let mut hash = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::config(format!("Expected key=value, got: {}", line)));
            };
            let value = value.trim();
            match key.trim() {
                "version" => version = Some(value),
                "hash" => hash = Some(value),
                "store" => config.store_dir = value.to_string(),
                "catalog" => config.catalog_file = value.to_string(),
                "table" => config.table = value.to_string(),
                "unique" => {
                    config.unique_fields = value
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }

        if version != Some(CONFIG_VERSION) {
            return Err(Error::config(format!(
                "Unsupported config version: {:?}",
                version
            )));
        }

        let hash = hash.ok_or_else(|| Error::config("Missing hash in config"))?;
        config.algorithm = Algorithm::parse(hash)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [("store", &self.store_dir), ("catalog", &self.catalog_file)] {
            let path = Path::new(value);
            if value.is_empty()
                || path.is_absolute()
                || path
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(Error::config(format!(
                    "{} must be a relative path inside the lake, got {:?}",
                    key, value
                )));
            }
        }

        validate_identifier(&self.table).map_err(|_| {
            Error::config(format!("Invalid table name: {:?}", self.table))
        })?;
        for field in &self.unique_fields {
            validate_identifier(field)
                .map_err(|_| Error::config(format!("Invalid unique field: {:?}", field)))?;
        }
        Ok(())
    }

    /// Render in the on-disk format.
    pub fn to_config_string(&self) -> String {
        let mut out = format!(
            "version={}\nhash={}\nstore={}\ncatalog={}\ntable={}\n",
            CONFIG_VERSION,
            self.algorithm.as_str(),
            self.store_dir,
            self.catalog_file,
            self.table
        );
        if !self.unique_fields.is_empty() {
            out.push_str(&format!("unique={}\n", self.unique_fields.join(",")));
        }
        out
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        fs::write(path, self.to_config_string())?;
        Ok(())
    }
}
