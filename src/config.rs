use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    extract::ExtractLimits,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BOOKKEEPER_CONFIG";

/// Settings read from the JSON configuration file.
///
/// Every field is optional in the file; missing ones take the defaults
/// below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Library roots scanned when `scan` is given none.
    pub libraries: Vec<PathBuf>,
    /// Where archives are unpacked, ideally a RAM drive.
    pub scratch_dir: PathBuf,
    /// Refuse to scan unless `scratch_dir` is a tmpfs mount.
    pub require_tmpfs: bool,
    /// Catalog file; defaults to one inside the data directory.
    pub catalog: Option<PathBuf>,
    /// OCR language passed to tesseract.
    pub language: String,
    /// Leave scratch directories behind for debugging.
    pub keep_artifacts: bool,
    pub export_dir: Option<PathBuf>,
    pub max_pages: u32,
    pub max_text_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        let limits = ExtractLimits::default();
        Self {
            libraries: Vec::new(),
            scratch_dir: PathBuf::from("/mnt/ramdrive"),
            require_tmpfs: false,
            catalog: None,
            language: "eng".to_string(),
            keep_artifacts: false,
            export_dir: None,
            max_pages: limits.max_pages,
            max_text_len: limits.max_text_len,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("invalid {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load the configuration, in order of priority:
    /// 1. An explicit path (from --config)
    /// 2. The BOOKKEEPER_CONFIG environment variable
    /// 3. `config.json` in the data directory, if present
    /// 4. Built-in defaults
    pub fn resolve(explicit: Option<&Path>, data_dir: &DataDir) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let default_file = data_dir.config_file();
        if default_file.is_file() {
            return Self::load(&default_file);
        }
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be at least 1".into()));
        }
        if self.max_text_len == 0 {
            return Err(Error::Config("max_text_len must be at least 1".into()));
        }
        Ok(())
    }

    pub fn catalog_path(&self, data_dir: &DataDir) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| data_dir.catalog_db())
    }

    pub fn limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_pages: self.max_pages,
            max_text_len: self.max_text_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"libraries": ["/books"], "max_pages": 2}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.libraries, vec![PathBuf::from("/books")]);
        assert_eq!(config.max_pages, 2);
        assert_eq!(config.max_text_len, 1024);
        assert_eq!(config.language, "eng");
        assert_eq!(config.scratch_dir, PathBuf::from("/mnt/ramdrive"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"ram_drive": "/tmp"}"#).unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"max_pages": 0}"#).unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        std::fs::write(data_dir.config_file(), r#"{"language": "rus"}"#)
            .unwrap();

        let explicit = data_dir.config_file();
        let config = Config::resolve(Some(&explicit), &data_dir).unwrap();
        assert_eq!(config.language, "rus");
        assert_eq!(config.catalog_path(&data_dir), data_dir.catalog_db());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let missing = tmp.path().join("nope.json");

        assert!(Config::resolve(Some(&missing), &data_dir).is_err());
    }
}
