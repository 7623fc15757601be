use std::{collections::HashSet, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    Table,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    archive::split_nested,
    error::{Error, Result},
    extract::DocumentInfo,
    kind::{ArchiveKind, DocumentKind, FileKind},
};

/// Content tables, keyed by content hash.
const ARCHIVES: TableDefinition<&str, &[u8]> = TableDefinition::new("archives");
const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");

/// Location tables, keyed by logical path.
const ARCHIVE_LOCATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("archive_locations");
const DOCUMENT_LOCATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("document_locations");
const BAD_FILES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("bad_files");
const MISC_PATHS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("misc_paths");
const MISC_FILES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("misc_files");

type RecordTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Mark-and-sweep state of a location row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Not yet seen by the scan in progress.
    Tentative,
    Confirmed,
}

/// Why a file ended up in the bad-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadName,
    Unreadable,
    ToolFailure,
    Unsupported,
    Extraction,
}

impl ErrorCode {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::BadName(_) => ErrorCode::BadName,
            Error::Io(_) => ErrorCode::Unreadable,
            Error::Tool { .. } => ErrorCode::ToolFailure,
            Error::Unsupported(_) => ErrorCode::Unsupported,
            _ => ErrorCode::Extraction,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::BadName => "bad-name",
            ErrorCode::Unreadable => "unreadable",
            ErrorCode::ToolFailure => "tool-failure",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::Extraction => "extraction",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub kind: ArchiveKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub size: u64,
    pub ocr: bool,
    pub kind: DocumentKind,
    pub page_count: Option<u32>,
    pub text: String,
}

/// Binds a logical path to archive or document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub hash: String,
    pub parent_archive_hash: Option<String>,
    pub status: Liveness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadFileRecord {
    pub kind: Option<FileKind>,
    pub hash: String,
    pub parent_archive_hash: Option<String>,
    pub code: ErrorCode,
    /// Captured tool output or error message.
    pub diagnostics: String,
    pub status: Liveness,
}

/// A file that is neither a document nor an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscFileRecord {
    pub path: String,
    pub basename: String,
    pub extension: String,
    pub size: u64,
    pub hash: String,
    pub status: Liveness,
}

/// What the catalog knows about a logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownLocation {
    Unseen,
    Bad { hash: String },
    Scanned { hash: String, size: u64 },
}

/// Which location table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Archive,
    Document,
}

/// The content row behind a path, or why there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationDetails {
    Archive(ArchiveRecord),
    Document(DocumentRecord),
    Bad(BadFileRecord),
}

/// Everything the catalog holds about one logical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationReport {
    pub path: String,
    pub hash: String,
    pub parent_archive_hash: Option<String>,
    /// `None` if the location's content row is missing.
    pub details: Option<LocationDetails>,
}

/// Rows removed by [`Catalog::end_sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub archive_locations: usize,
    pub document_locations: usize,
    pub misc_files: usize,
    pub misc_paths: usize,
    pub archives: usize,
    pub documents: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub archives: u64,
    pub archive_locations: u64,
    pub documents: u64,
    pub document_locations: u64,
    pub bad_files: u64,
    pub misc_files: u64,
}

trait Swept {
    fn status(&self) -> Liveness;
    fn set_status(&mut self, status: Liveness);
}

impl Swept for LocationRecord {
    fn status(&self) -> Liveness {
        self.status
    }
    fn set_status(&mut self, status: Liveness) {
        self.status = status;
    }
}

impl Swept for MiscFileRecord {
    fn status(&self) -> Liveness {
        self.status
    }
    fn set_status(&mut self, status: Liveness) {
        self.status = status;
    }
}

impl Swept for Liveness {
    fn status(&self) -> Liveness {
        *self
    }
    fn set_status(&mut self, status: Liveness) {
        *self = status;
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn get<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>> {
    match table.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn put<T: Serialize>(
    table: &mut RecordTable<'_>,
    key: &str,
    record: &T,
) -> Result<()> {
    table.insert(key, encode(record)?.as_slice())?;
    Ok(())
}

fn all<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<(String, T)>> {
    let mut result = Vec::new();
    for entry in table.iter()? {
        let (k, v) = entry?;
        result.push((k.value().to_string(), decode(v.value())?));
    }
    Ok(result)
}

/// Whether `path` is `prefix` itself or lies underneath it.
fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Set every row of `table` to `status`.
fn mark_all<R>(table: &mut RecordTable<'_>, status: Liveness) -> Result<()>
where
    R: Swept + Serialize + DeserializeOwned,
{
    for (key, mut record) in all::<R>(&*table)? {
        if record.status() != status {
            record.set_status(status);
            put(table, &key, &record)?;
        }
    }
    Ok(())
}

/// Confirm every row at or below `prefix`.
fn confirm_under<R>(table: &mut RecordTable<'_>, prefix: &str) -> Result<usize>
where
    R: Swept + Serialize + DeserializeOwned,
{
    let mut pending = Vec::new();
    for entry in table.range(prefix..)? {
        let (k, v) = entry?;
        let key = k.value();
        if !key.starts_with(prefix) {
            break;
        }
        if !is_under(key, prefix) {
            continue;
        }
        let record: R = decode(v.value())?;
        if record.status() == Liveness::Tentative {
            pending.push((key.to_string(), record));
        }
    }

    let count = pending.len();
    for (key, mut record) in pending {
        record.set_status(Liveness::Confirmed);
        put(table, &key, &record)?;
    }
    Ok(count)
}

/// Move every row at or below `old` to the same place below `new`.
fn rebase(table: &mut RecordTable<'_>, old: &str, new: &str) -> Result<usize> {
    let mut moved = Vec::new();
    for entry in table.range(old..)? {
        let (k, v) = entry?;
        let key = k.value();
        if !key.starts_with(old) {
            break;
        }
        if is_under(key, old) {
            moved.push((key.to_string(), v.value().to_vec()));
        }
    }

    for (key, _) in &moved {
        table.remove(key.as_str())?;
    }
    for (key, value) in &moved {
        let rebased = format!("{new}{}", &key[old.len()..]);
        table.insert(rebased.as_str(), value.as_slice())?;
    }
    Ok(moved.len())
}

/// [`rebase`] for misc files, whose records also carry their directory.
fn rebase_misc_files(
    table: &mut RecordTable<'_>,
    old: &str,
    new: &str,
) -> Result<usize> {
    let moved: Vec<(String, MiscFileRecord)> = all::<MiscFileRecord>(&*table)?
        .into_iter()
        .filter(|(key, _)| is_under(key, old))
        .collect();
    for (key, mut record) in moved.iter().cloned() {
        table.remove(key.as_str())?;
        if let Some(rest) = record.path.strip_prefix(old) {
            record.path = format!("{new}{rest}");
        }
        put(table, &misc_key(&record.path, &record.basename), &record)?;
    }
    Ok(moved.len())
}

/// Delete every row still tentative.
fn sweep<R>(table: &mut RecordTable<'_>) -> Result<usize>
where
    R: Swept + DeserializeOwned,
{
    let stale: Vec<String> = all::<R>(&*table)?
        .into_iter()
        .filter(|(_, record)| record.status() == Liveness::Tentative)
        .map(|(key, _)| key)
        .collect();
    for key in &stale {
        table.remove(key.as_str())?;
    }
    Ok(stale.len())
}

/// Delete content rows whose hash is no longer referenced.
fn collect_garbage(
    content: &mut RecordTable<'_>,
    referenced: &HashSet<String>,
) -> Result<usize> {
    let mut orphans = Vec::new();
    for entry in content.iter()? {
        let (k, _) = entry?;
        if !referenced.contains(k.value()) {
            orphans.push(k.value().to_string());
        }
    }
    for hash in &orphans {
        content.remove(hash.as_str())?;
    }
    Ok(orphans.len())
}

fn confirmed(hash: &str, parent: Option<&str>) -> LocationRecord {
    LocationRecord {
        hash: hash.to_string(),
        parent_archive_hash: parent.map(str::to_string),
        status: Liveness::Confirmed,
    }
}

/// The persistent catalog of archives, documents and where they live.
///
/// Every mutating call runs in its own write transaction and is durable
/// once it returns.
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(ARCHIVES)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(ARCHIVE_LOCATIONS)?;
        txn.open_table(DOCUMENT_LOCATIONS)?;
        txn.open_table(BAD_FILES)?;
        txn.open_table(MISC_PATHS)?;
        txn.open_table(MISC_FILES)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<T>,
    ) -> Result<T> {
        let txn = self.db.begin_write()?;
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }

    // -- Recording --

    /// Register an archive at `logical`, inserting its content row on first
    /// sight of `hash`.
    pub fn record_archive(
        &self,
        logical: &str,
        size: u64,
        hash: &str,
        parent: Option<&str>,
        kind: ArchiveKind,
    ) -> Result<()> {
        self.write(|txn| {
            let mut archives = txn.open_table(ARCHIVES)?;
            if archives.get(hash)?.is_none() {
                put(&mut archives, hash, &ArchiveRecord { kind, size })?;
            }
            let mut locations = txn.open_table(ARCHIVE_LOCATIONS)?;
            put(&mut locations, logical, &confirmed(hash, parent))
        })
    }

    /// Register a document at `logical`. Text is stored only on the first
    /// insert of its hash.
    pub fn record_document(
        &self,
        logical: &str,
        info: &DocumentInfo,
        parent: Option<&str>,
    ) -> Result<()> {
        self.write(|txn| {
            let mut documents = txn.open_table(DOCUMENTS)?;
            if documents.get(info.hash.as_str())?.is_none() {
                let record = DocumentRecord {
                    size: info.size,
                    ocr: info.ocr,
                    kind: info.kind,
                    page_count: info.page_count,
                    text: info.text.clone(),
                };
                put(&mut documents, &info.hash, &record)?;
            }
            let mut locations = txn.open_table(DOCUMENT_LOCATIONS)?;
            put(&mut locations, logical, &confirmed(&info.hash, parent))
        })
    }

    /// Register a new location for document content that is already
    /// cataloged.
    pub fn record_document_location(
        &self,
        logical: &str,
        hash: &str,
        parent: Option<&str>,
    ) -> Result<()> {
        self.write(|txn| {
            let documents = txn.open_table(DOCUMENTS)?;
            if documents.get(hash)?.is_none() {
                return Err(Error::NotFound {
                    kind: "document",
                    name: hash.to_string(),
                });
            }
            let mut locations = txn.open_table(DOCUMENT_LOCATIONS)?;
            put(&mut locations, logical, &confirmed(hash, parent))
        })
    }

    /// Copy the locations found inside an already cataloged archive so
    /// they also appear under `logical`, another copy of the same archive.
    ///
    /// Returns the number of rows written.
    pub fn mirror_archive_contents(
        &self,
        logical: &str,
        hash: &str,
    ) -> Result<usize> {
        self.write(|txn| {
            let mut archive_locations = txn.open_table(ARCHIVE_LOCATIONS)?;
            let source = all::<LocationRecord>(&archive_locations)?
                .into_iter()
                .find(|(path, record)| record.hash == hash && path != logical)
                .map(|(path, _)| path);
            let Some(source) = source else {
                return Ok(0);
            };

            let mut written = 0;
            let mut document_locations = txn.open_table(DOCUMENT_LOCATIONS)?;
            for table in [&mut archive_locations, &mut document_locations] {
                let children: Vec<(String, LocationRecord)> =
                    all::<LocationRecord>(&*table)?
                        .into_iter()
                        .filter(|(path, _)| {
                            path != &source && is_under(path, &source)
                        })
                        .collect();
                for (path, record) in children {
                    let mirrored =
                        format!("{logical}{}", &path[source.len()..]);
                    let record = LocationRecord {
                        status: Liveness::Confirmed,
                        ..record
                    };
                    put(table, &mirrored, &record)?;
                    written += 1;
                }
            }
            Ok(written)
        })
    }

    /// Record a failure at `logical`, replacing any earlier failure there.
    ///
    /// A failed path is no longer a valid archive or document location, so
    /// any such row is dropped.
    pub fn record_bad(
        &self,
        logical: &str,
        hash: &str,
        kind: Option<FileKind>,
        parent: Option<&str>,
        code: ErrorCode,
        diagnostics: &str,
    ) -> Result<()> {
        self.write(|txn| {
            let mut bad = txn.open_table(BAD_FILES)?;
            let record = BadFileRecord {
                kind,
                hash: hash.to_string(),
                parent_archive_hash: parent.map(str::to_string),
                code,
                diagnostics: diagnostics.to_string(),
                status: Liveness::Confirmed,
            };
            put(&mut bad, logical, &record)?;
            txn.open_table(ARCHIVE_LOCATIONS)?.remove(logical)?;
            txn.open_table(DOCUMENT_LOCATIONS)?.remove(logical)?;
            Ok(())
        })
    }

    /// Forget a failure, e.g. after the file was replaced and processed.
    pub fn clear_bad(&self, logical: &str) -> Result<bool> {
        self.write(|txn| {
            Ok(txn.open_table(BAD_FILES)?.remove(logical)?.is_some())
        })
    }

    /// Register or refresh a file that is neither a document nor an
    /// archive, together with its directory.
    pub fn record_misc_file(&self, record: &MiscFileRecord) -> Result<()> {
        self.write(|txn| {
            let key = misc_key(&record.path, &record.basename);
            let record = MiscFileRecord {
                status: Liveness::Confirmed,
                ..record.clone()
            };
            put(&mut txn.open_table(MISC_FILES)?, &key, &record)?;
            put(
                &mut txn.open_table(MISC_PATHS)?,
                &record.path,
                &Liveness::Confirmed,
            )
        })
    }

    pub fn misc_file(
        &self,
        path: &str,
        basename: &str,
    ) -> Result<Option<MiscFileRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MISC_FILES)?;
        get(&table, &misc_key(path, basename))
    }

    // -- Lookups --

    /// Classify a logical path, checking bad files before scanned ones.
    pub fn location_status(&self, logical: &str) -> Result<KnownLocation> {
        let txn = self.db.begin_read()?;

        let bad = txn.open_table(BAD_FILES)?;
        if let Some(record) = get::<BadFileRecord>(&bad, logical)? {
            return Ok(KnownLocation::Bad { hash: record.hash });
        }

        let archive_locations = txn.open_table(ARCHIVE_LOCATIONS)?;
        if let Some(location) =
            get::<LocationRecord>(&archive_locations, logical)?
        {
            let archives = txn.open_table(ARCHIVES)?;
            let size = get::<ArchiveRecord>(&archives, &location.hash)?
                .map_or(0, |a| a.size);
            return Ok(KnownLocation::Scanned {
                hash: location.hash,
                size,
            });
        }

        let document_locations = txn.open_table(DOCUMENT_LOCATIONS)?;
        if let Some(location) =
            get::<LocationRecord>(&document_locations, logical)?
        {
            let documents = txn.open_table(DOCUMENTS)?;
            let size = get::<DocumentRecord>(&documents, &location.hash)?
                .map_or(0, |d| d.size);
            return Ok(KnownLocation::Scanned {
                hash: location.hash,
                size,
            });
        }

        Ok(KnownLocation::Unseen)
    }

    /// Whether content with `hash` has already been processed as `kind`.
    pub fn is_processed_content(&self, hash: &str, kind: FileKind) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = if kind.is_archive() {
            txn.open_table(ARCHIVES)?
        } else {
            txn.open_table(DOCUMENTS)?
        };
        Ok(table.get(hash)?.is_some())
    }

    pub fn location(
        &self,
        logical: &str,
    ) -> Result<Option<(LocationKind, LocationRecord)>> {
        let txn = self.db.begin_read()?;
        let archives = txn.open_table(ARCHIVE_LOCATIONS)?;
        if let Some(record) = get(&archives, logical)? {
            return Ok(Some((LocationKind::Archive, record)));
        }
        let documents = txn.open_table(DOCUMENT_LOCATIONS)?;
        Ok(get(&documents, logical)?.map(|r| (LocationKind::Document, r)))
    }

    /// What the catalog knows about `logical`, whether it was cataloged or
    /// failed.
    pub fn report(&self, logical: &str) -> Result<Option<LocationReport>> {
        if let Some((kind, location)) = self.location(logical)? {
            let details = match kind {
                LocationKind::Archive => self
                    .archive(&location.hash)?
                    .map(LocationDetails::Archive),
                LocationKind::Document => self
                    .document(&location.hash)?
                    .map(LocationDetails::Document),
            };
            return Ok(Some(LocationReport {
                path: logical.to_string(),
                hash: location.hash,
                parent_archive_hash: location.parent_archive_hash,
                details,
            }));
        }

        let txn = self.db.begin_read()?;
        let bad = get::<BadFileRecord>(&txn.open_table(BAD_FILES)?, logical)?;
        Ok(bad.map(|record| LocationReport {
            path: logical.to_string(),
            hash: record.hash.clone(),
            parent_archive_hash: record.parent_archive_hash.clone(),
            details: Some(LocationDetails::Bad(record)),
        }))
    }

    pub fn document(&self, hash: &str) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        get(&txn.open_table(DOCUMENTS)?, hash)
    }

    pub fn archive(&self, hash: &str) -> Result<Option<ArchiveRecord>> {
        let txn = self.db.begin_read()?;
        get(&txn.open_table(ARCHIVES)?, hash)
    }

    pub fn documents(&self) -> Result<Vec<(String, DocumentRecord)>> {
        let txn = self.db.begin_read()?;
        all(&txn.open_table(DOCUMENTS)?)
    }

    pub fn document_locations(&self) -> Result<Vec<(String, LocationRecord)>> {
        let txn = self.db.begin_read()?;
        all(&txn.open_table(DOCUMENT_LOCATIONS)?)
    }

    /// Every archive and document location, ordered by path.
    pub fn locations(
        &self,
    ) -> Result<Vec<(String, LocationKind, LocationRecord)>> {
        let txn = self.db.begin_read()?;
        let archives = txn.open_table(ARCHIVE_LOCATIONS)?;
        let mut result: Vec<_> = all::<LocationRecord>(&archives)?
            .into_iter()
            .map(|(path, record)| (path, LocationKind::Archive, record))
            .collect();
        result.extend(
            all::<LocationRecord>(&txn.open_table(DOCUMENT_LOCATIONS)?)?
                .into_iter()
                .map(|(path, record)| (path, LocationKind::Document, record)),
        );
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }

    pub fn bad_files(&self) -> Result<Vec<(String, BadFileRecord)>> {
        let txn = self.db.begin_read()?;
        all(&txn.open_table(BAD_FILES)?)
    }

    pub fn misc_files(&self) -> Result<Vec<MiscFileRecord>> {
        let txn = self.db.begin_read()?;
        Ok(all(&txn.open_table(MISC_FILES)?)?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let txn = self.db.begin_read()?;
        Ok(CatalogStats {
            archives: txn.open_table(ARCHIVES)?.len()?,
            archive_locations: txn.open_table(ARCHIVE_LOCATIONS)?.len()?,
            documents: txn.open_table(DOCUMENTS)?.len()?,
            document_locations: txn.open_table(DOCUMENT_LOCATIONS)?.len()?,
            bad_files: txn.open_table(BAD_FILES)?.len()?,
            misc_files: txn.open_table(MISC_FILES)?.len()?,
        })
    }

    // -- Reconciliation --

    /// Mark every location row tentative. Bad files are left alone.
    pub fn begin_sweep(&self) -> Result<()> {
        self.write(|txn| {
            let status = Liveness::Tentative;
            mark_all::<LocationRecord>(
                &mut txn.open_table(ARCHIVE_LOCATIONS)?,
                status,
            )?;
            mark_all::<LocationRecord>(
                &mut txn.open_table(DOCUMENT_LOCATIONS)?,
                status,
            )?;
            mark_all::<MiscFileRecord>(&mut txn.open_table(MISC_FILES)?, status)?;
            mark_all::<Liveness>(&mut txn.open_table(MISC_PATHS)?, status)
        })
    }

    /// Confirm the location row at `logical` and point it at `parent`, the
    /// hash of the archive it was found in this time. Returns whether a row
    /// existed.
    pub fn confirm_location(
        &self,
        logical: &str,
        parent: Option<&str>,
    ) -> Result<bool> {
        self.write(|txn| {
            for definition in [ARCHIVE_LOCATIONS, DOCUMENT_LOCATIONS] {
                let mut table = txn.open_table(definition)?;
                if let Some(record) = get::<LocationRecord>(&table, logical)? {
                    let current = confirmed(&record.hash, parent);
                    if record != current {
                        put(&mut table, logical, &current)?;
                    }
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Confirm every location row at or below `prefix` without looking at
    /// the files themselves.
    ///
    /// Content under the prefix is assumed unchanged; nothing is rehashed.
    pub fn mark_subtree_existent(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.trim_end_matches('/');
        self.write(|txn| {
            let mut count = confirm_under::<LocationRecord>(
                &mut txn.open_table(ARCHIVE_LOCATIONS)?,
                prefix,
            )?;
            count += confirm_under::<LocationRecord>(
                &mut txn.open_table(DOCUMENT_LOCATIONS)?,
                prefix,
            )?;
            count += confirm_under::<MiscFileRecord>(
                &mut txn.open_table(MISC_FILES)?,
                prefix,
            )?;
            count += confirm_under::<Liveness>(
                &mut txn.open_table(MISC_PATHS)?,
                prefix,
            )?;
            Ok(count)
        })
    }

    /// Delete every location row still tentative, then the content rows no
    /// location refers to any more.
    pub fn end_sweep(&self) -> Result<SweepStats> {
        self.write(|txn| {
            let mut stats = SweepStats::default();

            let mut archive_locations = txn.open_table(ARCHIVE_LOCATIONS)?;
            stats.archive_locations =
                sweep::<LocationRecord>(&mut archive_locations)?;
            let mut document_locations = txn.open_table(DOCUMENT_LOCATIONS)?;
            stats.document_locations =
                sweep::<LocationRecord>(&mut document_locations)?;
            stats.misc_files =
                sweep::<MiscFileRecord>(&mut txn.open_table(MISC_FILES)?)?;
            stats.misc_paths =
                sweep::<Liveness>(&mut txn.open_table(MISC_PATHS)?)?;

            let referenced: HashSet<String> =
                all::<LocationRecord>(&archive_locations)?
                    .into_iter()
                    .map(|(_, record)| record.hash)
                    .collect();
            stats.archives = collect_garbage(
                &mut txn.open_table(ARCHIVES)?,
                &referenced,
            )?;

            let referenced: HashSet<String> =
                all::<LocationRecord>(&document_locations)?
                    .into_iter()
                    .map(|(_, record)| record.hash)
                    .collect();
            stats.documents = collect_garbage(
                &mut txn.open_table(DOCUMENTS)?,
                &referenced,
            )?;

            Ok(stats)
        })
    }

    // -- Editing --

    /// Move the location at `old` to `new`. Renaming an archive moves
    /// everything recorded inside it as well, failures and misc files
    /// included.
    ///
    /// Only the catalog changes; see [`rename_file`](Self::rename_file).
    pub fn rename(&self, old: &str, new: &str) -> Result<LocationKind> {
        self.write(|txn| {
            let mut archives = txn.open_table(ARCHIVE_LOCATIONS)?;
            let mut documents = txn.open_table(DOCUMENT_LOCATIONS)?;
            if archives.get(new)?.is_some() || documents.get(new)?.is_some() {
                return Err(Error::AlreadyExists {
                    kind: "location",
                    name: new.to_string(),
                });
            }

            if let Some(record) = get::<LocationRecord>(&documents, old)? {
                documents.remove(old)?;
                put(&mut documents, new, &record)?;
                return Ok(LocationKind::Document);
            }
            if archives.get(old)?.is_none() {
                return Err(Error::NotFound {
                    kind: "location",
                    name: old.to_string(),
                });
            }

            rebase(&mut archives, old, new)?;
            rebase(&mut documents, old, new)?;
            rebase(&mut txn.open_table(BAD_FILES)?, old, new)?;
            rebase(&mut txn.open_table(MISC_PATHS)?, old, new)?;
            rebase_misc_files(&mut txn.open_table(MISC_FILES)?, old, new)?;
            Ok(LocationKind::Archive)
        })
    }

    /// Rename a cataloged file on disk, then in the catalog, so the next
    /// scan finds it under its new name.
    ///
    /// Paths inside archives are refused. If the catalog update fails the
    /// file is moved back.
    pub fn rename_file(&self, old: &str, new: &str) -> Result<LocationKind> {
        for path in [old, new] {
            if split_nested(path).is_some() {
                return Err(Error::NestedRename(path.to_string()));
            }
        }
        if self.location(old)?.is_none() {
            return Err(Error::NotFound {
                kind: "location",
                name: old.to_string(),
            });
        }
        if Path::new(new).exists() {
            return Err(Error::AlreadyExists {
                kind: "file",
                name: new.to_string(),
            });
        }

        std::fs::rename(old, new)?;
        self.rename(old, new).inspect_err(|_| {
            if let Err(e) = std::fs::rename(new, old) {
                tracing::error!(
                    old,
                    new,
                    error = %e,
                    "could not move file back after a failed rename"
                );
            }
        })
    }
}

fn misc_key(path: &str, basename: &str) -> String {
    if path.is_empty() {
        basename.to_string()
    } else {
        format!("{}/{basename}", path.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Catalog) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Catalog::open(&tmp.path().join("catalog.redb")).unwrap();
        (tmp, db)
    }

    fn doc(hash: &str, text: &str) -> DocumentInfo {
        DocumentInfo {
            hash: hash.to_string(),
            size: text.len() as u64,
            kind: DocumentKind::Pdf,
            page_count: Some(1),
            ocr: false,
            text: text.to_string(),
        }
    }

    fn misc(path: &str, basename: &str) -> MiscFileRecord {
        MiscFileRecord {
            path: path.to_string(),
            basename: basename.to_string(),
            extension: "jpg".to_string(),
            size: 3,
            hash: "m".to_string(),
            status: Liveness::Confirmed,
        }
    }

    #[test]
    fn document_text_is_stored_once_per_hash() {
        let (_tmp, db) = test_db();
        db.record_document("/lib/a.pdf", &doc("h1", "first"), None)
            .unwrap();
        db.record_document("/lib/b.pdf", &doc("h1", "second"), None)
            .unwrap();

        assert_eq!(db.document("h1").unwrap().unwrap().text, "first");
        assert_eq!(db.document_locations().unwrap().len(), 2);
        assert_eq!(db.documents().unwrap().len(), 1);
    }

    #[test]
    fn archive_insert_is_idempotent() {
        let (_tmp, db) = test_db();
        db.record_archive("/lib/a.zip", 10, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_archive("/lib/a.zip", 10, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_archive("/lib/b.zip", 10, "z", None, ArchiveKind::Zip)
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.archives, 1);
        assert_eq!(stats.archive_locations, 2);
    }

    #[test]
    fn location_status_checks_bad_first() {
        let (_tmp, db) = test_db();
        assert_eq!(
            db.location_status("/lib/a.pdf").unwrap(),
            KnownLocation::Unseen
        );

        db.record_document("/lib/a.pdf", &doc("h1", "text"), None)
            .unwrap();
        assert_eq!(
            db.location_status("/lib/a.pdf").unwrap(),
            KnownLocation::Scanned {
                hash: "h1".to_string(),
                size: 4
            }
        );

        db.record_bad(
            "/lib/a.pdf",
            "h2",
            Some(FileKind::Document(DocumentKind::Pdf)),
            None,
            ErrorCode::ToolFailure,
            "pdfinfo failed",
        )
        .unwrap();
        assert_eq!(
            db.location_status("/lib/a.pdf").unwrap(),
            KnownLocation::Bad {
                hash: "h2".to_string()
            }
        );
        // The failed path no longer counts as a document location.
        assert!(db.location("/lib/a.pdf").unwrap().is_none());
    }

    #[test]
    fn processed_content_is_per_kind() {
        let (_tmp, db) = test_db();
        db.record_document("/a.pdf", &doc("h", "t"), None).unwrap();
        let pdf = FileKind::Document(DocumentKind::Pdf);
        let zip = FileKind::Archive(ArchiveKind::Zip);
        assert!(db.is_processed_content("h", pdf).unwrap());
        assert!(!db.is_processed_content("h", zip).unwrap());
        assert!(!db.is_processed_content("other", pdf).unwrap());
    }

    #[test]
    fn bad_record_updates_in_place() {
        let (_tmp, db) = test_db();
        for (code, message) in [
            (ErrorCode::ToolFailure, "first"),
            (ErrorCode::Extraction, "second"),
        ] {
            db.record_bad("/x.djvu", "h", None, None, code, message)
                .unwrap();
        }
        let bad = db.bad_files().unwrap();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].1.code, ErrorCode::Extraction);
        assert_eq!(bad[0].1.diagnostics, "second");
    }

    #[test]
    fn sweep_removes_unconfirmed_rows_and_orphans() {
        let (_tmp, db) = test_db();
        db.record_document("/lib/a.pdf", &doc("shared", "t"), None)
            .unwrap();
        db.record_document("/lib/b.pdf", &doc("shared", "t"), None)
            .unwrap();
        db.record_document("/lib/c.pdf", &doc("lonely", "t"), None)
            .unwrap();

        db.begin_sweep().unwrap();
        assert!(db.confirm_location("/lib/a.pdf", None).unwrap());
        let stats = db.end_sweep().unwrap();

        assert_eq!(stats.document_locations, 2);
        assert_eq!(stats.documents, 1);
        assert!(db.document("shared").unwrap().is_some());
        assert!(db.document("lonely").unwrap().is_none());
    }

    #[test]
    fn sweep_leaves_bad_files_alone() {
        let (_tmp, db) = test_db();
        db.record_bad("/gone.pdf", "h", None, None, ErrorCode::Unreadable, "")
            .unwrap();
        db.begin_sweep().unwrap();
        db.end_sweep().unwrap();
        assert_eq!(db.bad_files().unwrap().len(), 1);
    }

    #[test]
    fn sweep_handles_misc_rows() {
        let (_tmp, db) = test_db();
        db.record_misc_file(&misc("/lib", "cover.jpg")).unwrap();
        db.record_misc_file(&misc("/lib/old", "junk.jpg")).unwrap();

        db.begin_sweep().unwrap();
        db.record_misc_file(&misc("/lib", "cover.jpg")).unwrap();
        let stats = db.end_sweep().unwrap();

        assert_eq!(stats.misc_files, 1);
        assert_eq!(stats.misc_paths, 1);
        assert!(db.misc_file("/lib", "cover.jpg").unwrap().is_some());
        assert!(db.misc_file("/lib/old", "junk.jpg").unwrap().is_none());
    }

    #[test]
    fn subtree_confirmation_respects_component_boundaries() {
        let (_tmp, db) = test_db();
        db.record_archive("/lib/a.zip", 1, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_document("/lib/a.zip/x.pdf", &doc("x", "x"), Some("z"))
            .unwrap();
        db.record_document("/lib/a.zip2/y.pdf", &doc("y", "y"), None)
            .unwrap();

        db.begin_sweep().unwrap();
        let confirmed = db.mark_subtree_existent("/lib/a.zip").unwrap();
        assert_eq!(confirmed, 2);
        db.end_sweep().unwrap();

        assert!(db.location("/lib/a.zip/x.pdf").unwrap().is_some());
        assert!(db.location("/lib/a.zip2/y.pdf").unwrap().is_none());
    }

    #[test]
    fn mirror_copies_archive_children() {
        let (_tmp, db) = test_db();
        db.record_archive("/lib/a.zip", 1, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_document("/lib/a.zip/x.pdf", &doc("x", "x"), Some("z"))
            .unwrap();
        db.record_archive("/lib/copy.zip", 1, "z", None, ArchiveKind::Zip)
            .unwrap();

        let written = db.mirror_archive_contents("/lib/copy.zip", "z").unwrap();
        assert_eq!(written, 1);
        let (kind, record) = db.location("/lib/copy.zip/x.pdf").unwrap().unwrap();
        assert_eq!(kind, LocationKind::Document);
        assert_eq!(record.hash, "x");
        assert_eq!(record.parent_archive_hash.as_deref(), Some("z"));
    }

    #[test]
    fn rename_moves_exactly_one_row() {
        let (_tmp, db) = test_db();
        db.record_document("/lib/a.pdf", &doc("h", "t"), None).unwrap();
        db.record_document("/lib/b.pdf", &doc("h", "t"), None).unwrap();

        let kind = db.rename("/lib/a.pdf", "/lib/renamed.pdf").unwrap();
        assert_eq!(kind, LocationKind::Document);

        let paths: Vec<String> = db
            .document_locations()
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(paths, vec!["/lib/b.pdf", "/lib/renamed.pdf"]);
    }

    #[test]
    fn rename_errors() {
        let (_tmp, db) = test_db();
        db.record_document("/a.pdf", &doc("h", "t"), None).unwrap();
        db.record_document("/b.pdf", &doc("h", "t"), None).unwrap();

        assert!(matches!(
            db.rename("/missing.pdf", "/c.pdf"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            db.rename("/a.pdf", "/b.pdf"),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn renaming_an_archive_moves_its_contents() {
        let (_tmp, db) = test_db();
        db.record_archive("/lib/a.zip", 1, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_archive("/lib/a.zip/b.rar", 1, "r", Some("z"), ArchiveKind::Rar)
            .unwrap();
        db.record_document("/lib/a.zip/b.rar/c.pdf", &doc("c", "c"), Some("r"))
            .unwrap();
        db.record_document("/lib/a.zip2/d.pdf", &doc("d", "d"), None)
            .unwrap();
        db.record_bad("/lib/a.zip/bad.pdf", "b", None, Some("z"), ErrorCode::ToolFailure, "x")
            .unwrap();
        db.record_misc_file(&misc("/lib/a.zip/art", "cover.jpg"))
            .unwrap();

        let kind = db.rename("/lib/a.zip", "/lib/moved.zip").unwrap();
        assert_eq!(kind, LocationKind::Archive);

        let paths: Vec<String> =
            db.locations().unwrap().into_iter().map(|(p, _, _)| p).collect();
        assert_eq!(paths, vec![
            "/lib/a.zip2/d.pdf",
            "/lib/moved.zip",
            "/lib/moved.zip/b.rar",
            "/lib/moved.zip/b.rar/c.pdf",
        ]);
        assert_eq!(db.bad_files().unwrap()[0].0, "/lib/moved.zip/bad.pdf");
        let misc = db.misc_files().unwrap();
        assert_eq!(misc[0].path, "/lib/moved.zip/art");
        assert!(db.misc_file("/lib/moved.zip/art", "cover.jpg").unwrap().is_some());
    }

    #[test]
    fn rename_file_moves_the_file_too() {
        let (tmp, db) = test_db();
        let old = tmp.path().join("draft.pdf");
        let new = tmp.path().join("final.pdf");
        std::fs::write(&old, "text").unwrap();
        let (old, new) = (old.to_str().unwrap(), new.to_str().unwrap());
        db.record_document(old, &doc("h", "text"), None).unwrap();

        db.rename_file(old, new).unwrap();
        assert!(!Path::new(old).exists());
        assert_eq!(std::fs::read_to_string(new).unwrap(), "text");
        assert!(db.location(old).unwrap().is_none());
        assert!(db.location(new).unwrap().is_some());
    }

    #[test]
    fn rename_file_refuses_archive_members_and_clobbering() {
        let (tmp, db) = test_db();
        let zip = tmp.path().join("a.zip");
        std::fs::write(&zip, "{}").unwrap();
        let zip = zip.to_str().unwrap();
        let inner = format!("{zip}/c.pdf");
        db.record_archive(zip, 2, "z", None, ArchiveKind::Zip).unwrap();
        db.record_document(&inner, &doc("c", "c"), Some("z")).unwrap();

        assert!(matches!(
            db.rename_file(&inner, &format!("{zip}/d.pdf")),
            Err(Error::NestedRename(_))
        ));

        let other = tmp.path().join("b.zip");
        std::fs::write(&other, "{}").unwrap();
        assert!(matches!(
            db.rename_file(zip, other.to_str().unwrap()),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(Path::new(zip).exists());
        assert!(db.location(zip).unwrap().is_some());
    }

    #[test]
    fn confirmation_repoints_the_parent() {
        let (_tmp, db) = test_db();
        db.record_document("/lib/a.zip/x.pdf", &doc("x", "x"), Some("old"))
            .unwrap();

        db.begin_sweep().unwrap();
        assert!(
            db.confirm_location("/lib/a.zip/x.pdf", Some("new")).unwrap()
        );
        assert!(!db.confirm_location("/lib/missing.pdf", None).unwrap());

        let (_, record) = db.location("/lib/a.zip/x.pdf").unwrap().unwrap();
        assert_eq!(record.parent_archive_hash.as_deref(), Some("new"));
        assert_eq!(record.status, Liveness::Confirmed);
    }

    #[test]
    fn report_covers_every_kind_of_path() {
        let (_tmp, db) = test_db();
        db.record_archive("/lib/a.zip", 7, "z", None, ArchiveKind::Zip)
            .unwrap();
        db.record_document("/lib/a.zip/b.pdf", &doc("b", "book"), Some("z"))
            .unwrap();
        db.record_bad("/lib/c.djvu", "c", None, None, ErrorCode::ToolFailure, "boom")
            .unwrap();

        let archive = db.report("/lib/a.zip").unwrap().unwrap();
        assert_eq!(
            archive.details,
            Some(LocationDetails::Archive(ArchiveRecord {
                kind: ArchiveKind::Zip,
                size: 7,
            }))
        );

        let book = db.report("/lib/a.zip/b.pdf").unwrap().unwrap();
        assert_eq!(book.hash, "b");
        assert_eq!(book.parent_archive_hash.as_deref(), Some("z"));
        match book.details {
            Some(LocationDetails::Document(record)) => {
                assert_eq!(record.text, "book");
                assert_eq!(record.page_count, Some(1));
            }
            other => panic!("expected a document, got {other:?}"),
        }

        let bad = db.report("/lib/c.djvu").unwrap().unwrap();
        assert!(matches!(
            bad.details,
            Some(LocationDetails::Bad(ref r)) if r.diagnostics == "boom"
        ));

        assert!(db.report("/lib/unknown.pdf").unwrap().is_none());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.redb");
        {
            let db = Catalog::open(&path).unwrap();
            db.record_document("/a.pdf", &doc("h", "kept"), None).unwrap();
        }
        let db = Catalog::open(&path).unwrap();
        assert_eq!(db.document("h").unwrap().unwrap().text, "kept");
    }

    #[test]
    fn error_codes_follow_error_kinds() {
        let io = Error::Io(std::io::Error::other("x"));
        assert_eq!(ErrorCode::from_error(&io), ErrorCode::Unreadable);
        let name = Error::BadName("x".into());
        assert_eq!(ErrorCode::from_error(&name), ErrorCode::BadName);
        let tool = Error::Tool {
            tool: "7z".into(),
            code: 2,
            output: String::new(),
        };
        assert_eq!(ErrorCode::from_error(&tool), ErrorCode::ToolFailure);
        let format = Error::Unsupported("rtf".into());
        assert_eq!(ErrorCode::from_error(&format), ErrorCode::Unsupported);
    }
}
