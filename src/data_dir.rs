use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "BOOKKEEPER_DATA_DIR";

/// Where the catalog and the default config file live.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// `--data-dir` wins, then `BOOKKEEPER_DATA_DIR`, then the XDG data
    /// home (`~/.local/share/bookkeeper`). The directory is created if
    /// missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        Self::resolve_from(explicit, from_env)
    }

    fn resolve_from(
        explicit: Option<&Path>,
        from_env: Option<PathBuf>,
    ) -> Result<Self> {
        let root = match (explicit, from_env) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => path,
            (None, None) => xdg::BaseDirectories::with_prefix("bookkeeper")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config("no XDG data home for bookkeeper".into())
                })?,
        };

        if std::fs::create_dir_all(&root).is_err() {
            return Err(Error::DataDir(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("catalog.redb")
    }

    /// Picked up when neither `--config` nor `BOOKKEEPER_CONFIG` is set.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}
