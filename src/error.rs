use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("corrupt catalog record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("extraction scratch area is not mounted: {0}")]
    ScratchNotMounted(PathBuf),

    #[error("{tool} exited with code {code}:\n{output}")]
    Tool {
        tool: String,
        code: i32,
        output: String,
    },

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("cannot rename a file inside an archive: {0}")]
    NestedRename(String),

    #[error("file name is not valid UTF-8: {0}")]
    BadName(String),

    #[error("invalid search term: {0}")]
    Query(#[from] regex::Error),
}

impl Error {
    /// Whether this error came from the catalog store.
    ///
    /// Catalog failures abort a scan; everything else is recorded against
    /// the file that caused it.
    pub fn is_catalog(&self) -> bool {
        matches!(
            self,
            Error::Redb(_)
                | Error::RedbDatabase(_)
                | Error::RedbStorage(_)
                | Error::RedbTransaction(_)
                | Error::RedbTable(_)
                | Error::RedbCommit(_)
                | Error::Record(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failures_are_not_catalog_errors() {
        let err = Error::Tool {
            tool: "unrar".to_string(),
            code: 3,
            output: "CRC failed".to_string(),
        };
        assert!(!err.is_catalog());
        assert!(err.to_string().contains("CRC failed"));
    }

    #[test]
    fn record_errors_are_catalog_errors() {
        let bad = serde_json::from_slice::<u32>(b"not json").unwrap_err();
        assert!(Error::from(bad).is_catalog());
    }
}
