use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info, warn};

use crate::{
    archive::ArchiveExtractor,
    catalog::{
        Catalog,
        ErrorCode,
        KnownLocation,
        Liveness,
        MiscFileRecord,
        SweepStats,
    },
    error::{Error, Result},
    extract::Extractors,
    hasher,
    kind::{self, FileKind},
};

/// Polled once per file; a `true` answer stops the scan after the file
/// currently being processed.
pub trait CancelSignal {
    fn should_stop(&self) -> bool;
}

/// A signal that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn should_stop(&self) -> bool {
        false
    }
}

impl CancelSignal for AtomicBool {
    fn should_stop(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// One unpacked archive on the way from a library root to the current
/// file. Frames borrow their parent, so the chain lives on the call stack.
#[derive(Debug)]
struct ArchiveFrame<'a> {
    /// Scratch directory the archive was unpacked into.
    physical_root: &'a Path,
    /// Logical path of the archive itself.
    logical_prefix: String,
    hash: String,
    parent: Option<&'a ArchiveFrame<'a>>,
}

impl ArchiveFrame<'_> {
    fn depth(&self) -> usize {
        1 + self.parent.map_or(0, ArchiveFrame::depth)
    }
}

/// Counts gathered over one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub documents: usize,
    pub archives: usize,
    /// New locations of content that was already cataloged.
    pub duplicates: usize,
    /// Known locations confirmed without reprocessing.
    pub unchanged: usize,
    pub misc: usize,
    /// Files that failed during this scan.
    pub failed: usize,
    /// Known-bad files left alone.
    pub known_bad: usize,
    pub cancelled: bool,
    /// Rows removed by the closing sweep; `None` when cancelled.
    pub removed: Option<SweepStats>,
}

/// Where a file stands before its content is looked at.
enum Prior {
    Unseen,
    /// Previously bad; holds the new hash of changed content.
    WasBad(String),
    Changed,
}

/// Walks library roots and brings the catalog in line with them.
pub struct Scanner<'a> {
    catalog: &'a Catalog,
    extractors: &'a Extractors,
    archives: &'a ArchiveExtractor,
    cancel: &'a dyn CancelSignal,
}

impl<'a> Scanner<'a> {
    pub fn new(
        catalog: &'a Catalog,
        extractors: &'a Extractors,
        archives: &'a ArchiveExtractor,
    ) -> Self {
        Self {
            catalog,
            extractors,
            archives,
            cancel: &NeverCancel,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a dyn CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scan `roots` and reconcile the catalog against them.
    ///
    /// Locations outside the roots are removed by the closing sweep. A
    /// cancelled scan skips the sweep, so nothing is deleted.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let roots = roots
            .iter()
            .map(|root| root.canonicalize())
            .collect::<std::io::Result<Vec<_>>>()?;

        self.catalog.begin_sweep()?;
        for root in &roots {
            info!(root = %root.display(), "scanning");
            let flow = if root.is_dir() {
                self.walk(root, None, &mut summary)?
            } else {
                self.visit(root, None, &mut summary)?
            };
            if flow.is_break() {
                summary.cancelled = true;
                info!("scan cancelled, catalog left unswept");
                return Ok(summary);
            }
        }

        let removed = self.catalog.end_sweep()?;
        debug!(?removed, "sweep finished");
        summary.removed = Some(removed);
        Ok(summary)
    }

    fn walk(
        &self,
        dir: &Path,
        frame: Option<&ArchiveFrame<'_>>,
        summary: &mut ScanSummary,
    ) -> Result<ControlFlow<()>> {
        let mut entries: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(std::io::Result::ok).collect(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory");
                return Ok(ControlFlow::Continue(()));
            }
        };
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let flow = if file_type.is_dir() {
                self.walk(&entry.path(), frame, summary)?
            } else if file_type.is_file() {
                self.visit(&entry.path(), frame, summary)?
            } else {
                continue;
            };
            if flow.is_break() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn visit(
        &self,
        path: &Path,
        frame: Option<&ArchiveFrame<'_>>,
        summary: &mut ScanSummary,
    ) -> Result<ControlFlow<()>> {
        if self.cancel.should_stop() {
            return Ok(ControlFlow::Break(()));
        }
        summary.files += 1;
        self.on_file(path, frame, summary)
    }

    fn on_file(
        &self,
        path: &Path,
        frame: Option<&ArchiveFrame<'_>>,
        summary: &mut ScanSummary,
    ) -> Result<ControlFlow<()>> {
        let parent = frame.map(|f| f.hash.as_str());

        let Some(logical) = logical_path(path, frame) else {
            let lossy = lossy_logical_path(path, frame);
            let hash = hasher::hash_file(path).unwrap_or_default();
            let kind = kind::classify(&lossy);
            self.record_failure(
                &lossy,
                &hash,
                kind,
                parent,
                Error::BadName(lossy.clone()),
                summary,
            )?;
            return Ok(ControlFlow::Continue(()));
        };

        let Some(kind) = kind::classify(&logical) else {
            self.on_misc_file(path, &logical, summary)?;
            return Ok(ControlFlow::Continue(()));
        };

        let prior = match self.catalog.location_status(&logical)? {
            KnownLocation::Unseen => Prior::Unseen,
            KnownLocation::Bad { hash } => match hasher::hash_file(path) {
                Ok(current) if current != hash => Prior::WasBad(current),
                _ => {
                    summary.known_bad += 1;
                    return Ok(ControlFlow::Continue(()));
                }
            },
            KnownLocation::Scanned { size, .. } => {
                if file_size(path) == Some(size) {
                    // The enclosing archive may have been re-unpacked with
                    // a new hash.
                    self.catalog.confirm_location(&logical, parent)?;
                    if kind.is_archive() {
                        self.catalog.mark_subtree_existent(&logical)?;
                    }
                    summary.unchanged += 1;
                    return Ok(ControlFlow::Continue(()));
                }
                Prior::Changed
            }
        };

        let hash = match prior {
            Prior::WasBad(hash) => {
                self.catalog.clear_bad(&logical)?;
                hash
            }
            Prior::Unseen | Prior::Changed => match hasher::hash_file(path) {
                Ok(hash) => hash,
                Err(e) => {
                    self.record_failure(
                        &logical,
                        "",
                        Some(kind),
                        parent,
                        e,
                        summary,
                    )?;
                    return Ok(ControlFlow::Continue(()));
                }
            },
        };

        match kind {
            FileKind::Document(document_kind) => {
                if self.catalog.is_processed_content(&hash, kind)? {
                    self.catalog
                        .record_document_location(&logical, &hash, parent)?;
                    debug!(path = %logical, hash = %hash, "duplicate document");
                    summary.duplicates += 1;
                    return Ok(ControlFlow::Continue(()));
                }

                match self.extractors.process(path, document_kind, &hash) {
                    Ok(info) => {
                        self.catalog.record_document(&logical, &info, parent)?;
                        info!(
                            path = %logical,
                            hash = %hash,
                            pages = ?info.page_count,
                            ocr = info.ocr,
                            "cataloged document"
                        );
                        summary.documents += 1;
                    }
                    Err(e) => self.record_failure(
                        &logical,
                        &hash,
                        Some(kind),
                        parent,
                        e,
                        summary,
                    )?,
                }
                Ok(ControlFlow::Continue(()))
            }
            FileKind::Archive(archive_kind) => {
                let size = file_size(path).unwrap_or_default();
                if self.catalog.is_processed_content(&hash, kind)? {
                    self.catalog.record_archive(
                        &logical,
                        size,
                        &hash,
                        parent,
                        archive_kind,
                    )?;
                    let mirrored =
                        self.catalog.mirror_archive_contents(&logical, &hash)?;
                    debug!(
                        path = %logical,
                        hash = %hash,
                        mirrored,
                        "duplicate archive"
                    );
                    summary.duplicates += 1;
                    return Ok(ControlFlow::Continue(()));
                }

                let dir = match self.archives.unpack(path, archive_kind) {
                    Ok(dir) => dir,
                    Err(e) => {
                        self.record_failure(
                            &logical,
                            &hash,
                            Some(kind),
                            parent,
                            e,
                            summary,
                        )?;
                        return Ok(ControlFlow::Continue(()));
                    }
                };

                let child = ArchiveFrame {
                    physical_root: &dir,
                    logical_prefix: logical,
                    hash,
                    parent: frame,
                };
                info!(
                    path = %child.logical_prefix,
                    hash = %child.hash,
                    depth = child.depth(),
                    "entering archive"
                );
                let walked = self.walk(&dir, Some(&child), summary);
                self.archives.release(&dir);

                // An archive is only known once all of its entries are, so
                // a walk cut short is repeated by the next scan.
                let flow = walked?;
                if flow.is_continue() {
                    self.catalog.record_archive(
                        &child.logical_prefix,
                        size,
                        &child.hash,
                        parent,
                        archive_kind,
                    )?;
                    summary.archives += 1;
                }
                Ok(flow)
            }
        }
    }

    fn on_misc_file(
        &self,
        path: &Path,
        logical: &str,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let (dir, basename) = match logical.rsplit_once('/') {
            Some((dir, basename)) => (dir, basename),
            None => ("", logical),
        };
        let Some(size) = file_size(path) else {
            warn!(path = %logical, "cannot stat file");
            return Ok(());
        };

        let record = match self.catalog.misc_file(dir, basename)? {
            Some(existing) if existing.size == size => existing,
            _ => {
                let hash = match hasher::hash_file(path) {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!(path = %logical, error = %e, "cannot hash file");
                        return Ok(());
                    }
                };
                let extension = Path::new(basename)
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                MiscFileRecord {
                    path: dir.to_string(),
                    basename: basename.to_string(),
                    extension,
                    size,
                    hash,
                    status: Liveness::Confirmed,
                }
            }
        };
        self.catalog.record_misc_file(&record)?;
        summary.misc += 1;
        Ok(())
    }

    /// Persist a per-file failure. Catalog errors are passed through.
    fn record_failure(
        &self,
        logical: &str,
        hash: &str,
        kind: Option<FileKind>,
        parent: Option<&str>,
        err: Error,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        if err.is_catalog() {
            return Err(err);
        }
        let code = ErrorCode::from_error(&err);
        let diagnostics = err.to_string();
        warn!(path = %logical, hash = %hash, %code, "bad file");
        debug!(path = %logical, %diagnostics);
        self.catalog
            .record_bad(logical, hash, kind, parent, code, &diagnostics)?;
        summary.failed += 1;
        Ok(())
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// The path a file is known by: its real path at the top level, or the
/// enclosing archive's logical path joined with its path inside the
/// archive. `None` when the name is not valid UTF-8.
fn logical_path(path: &Path, frame: Option<&ArchiveFrame<'_>>) -> Option<String> {
    match frame {
        None => path.to_str().map(str::to_string),
        Some(frame) => {
            let relative = path.strip_prefix(frame.physical_root).ok()?;
            let relative = relative.to_str()?;
            Some(format!("{}/{relative}", frame.logical_prefix))
        }
    }
}

fn lossy_logical_path(path: &Path, frame: Option<&ArchiveFrame<'_>>) -> String {
    let lossy = |p: &Path| p.to_string_lossy().into_owned();
    match frame {
        None => lossy(path),
        Some(frame) => match path.strip_prefix(frame.physical_root) {
            Ok(relative) => format!("{}/{}", frame.logical_prefix, lossy(relative)),
            Err(_) => lossy(path),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        archive::ScratchSpace,
        catalog::LocationKind,
        testing::{
            ManifestUnpacker,
            extraction_calls,
            plain_extractors,
            write_archive,
        },
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        library: PathBuf,
        scratch: PathBuf,
        catalog: Catalog,
        extractors: Extractors,
        archives: ArchiveExtractor,
        calls: std::sync::Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let library = tmp.path().join("library");
            let scratch = tmp.path().join("scratch");
            std::fs::create_dir_all(&library).unwrap();
            std::fs::create_dir_all(&scratch).unwrap();
            let catalog = Catalog::open(&tmp.path().join("catalog.redb")).unwrap();
            let (extractors, calls) = plain_extractors(&scratch);
            let archives = ArchiveExtractor::new(
                Box::new(ManifestUnpacker::default()),
                ScratchSpace::new(&scratch, false),
            );
            let library = library.canonicalize().unwrap();
            Self {
                _tmp: tmp,
                library,
                scratch,
                catalog,
                extractors,
                archives,
                calls,
            }
        }

        fn write(&self, relative: &str, contents: &str) -> String {
            let path = self.library.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
            path.to_str().unwrap().to_string()
        }

        fn scan(&self) -> ScanSummary {
            Scanner::new(&self.catalog, &self.extractors, &self.archives)
                .scan(&[self.library.clone()])
                .unwrap()
        }
    }

    #[test]
    fn catalogs_documents_and_misc_files() {
        let fx = Fixture::new();
        let book = fx.write("books/a.pdf", "alpha beta");
        fx.write("books/cover.jpg", "jpeg");

        let summary = fx.scan();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.misc, 1);

        let (kind, record) = fx.catalog.location(&book).unwrap().unwrap();
        assert_eq!(kind, LocationKind::Document);
        let document = fx.catalog.document(&record.hash).unwrap().unwrap();
        assert_eq!(document.text, "alpha beta");
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let fx = Fixture::new();
        fx.write(".cache/a.pdf", "hidden");
        fx.write(".b.pdf", "hidden");
        assert_eq!(fx.scan().files, 0);
    }

    #[test]
    fn second_scan_reprocesses_nothing() {
        let fx = Fixture::new();
        fx.write("a.pdf", "one");
        fx.write("b.zip", &write_archive(&[("c.pdf", "two")]));

        fx.scan();
        let calls = extraction_calls(&fx.calls);
        let before = fx.catalog.locations().unwrap();

        let summary = fx.scan();
        assert_eq!(extraction_calls(&fx.calls), calls);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(fx.catalog.locations().unwrap(), before);
    }

    #[test]
    fn archive_contents_get_logical_paths() {
        let fx = Fixture::new();
        let outer = fx.write(
            "outer.zip",
            &write_archive(&[("sub/inner.pdf", "nested text")]),
        );

        fx.scan();
        let inner = format!("{outer}/sub/inner.pdf");
        let (_, record) = fx.catalog.location(&inner).unwrap().unwrap();
        let (_, archive) = fx.catalog.location(&outer).unwrap().unwrap();
        assert_eq!(record.parent_archive_hash, Some(archive.hash));
    }

    #[test]
    fn scratch_dirs_are_removed_after_scan() {
        let fx = Fixture::new();
        fx.write("a.zip", &write_archive(&[("b.pdf", "x")]));
        fx.scan();
        assert_eq!(std::fs::read_dir(&fx.scratch).unwrap().count(), 0);
    }

    #[test]
    fn duplicate_content_is_extracted_once() {
        let fx = Fixture::new();
        fx.write("a.pdf", "same");
        fx.write("copy/a.pdf", "same");

        let summary = fx.scan();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(extraction_calls(&fx.calls), 1);
        assert_eq!(fx.catalog.documents().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_archive_mirrors_its_contents() {
        let fx = Fixture::new();
        let archive = write_archive(&[("inside.pdf", "text")]);
        fx.write("a.zip", &archive);
        let copy = fx.write("b.zip", &archive);

        fx.scan();
        assert!(
            fx.catalog
                .location(&format!("{copy}/inside.pdf"))
                .unwrap()
                .is_some()
        );
        assert_eq!(extraction_calls(&fx.calls), 1);
    }

    #[test]
    fn failures_become_bad_files() {
        let fx = Fixture::new();
        let broken = fx.write("broken.pdf", "CORRUPT");
        let archive = fx.write("broken.zip", "not a manifest");

        let summary = fx.scan();
        assert_eq!(summary.failed, 2);

        let bad = fx.catalog.bad_files().unwrap();
        let paths: Vec<&str> = bad.iter().map(|(p, _)| p.as_str()).collect();
        assert!(paths.contains(&broken.as_str()));
        assert!(paths.contains(&archive.as_str()));
        assert!(bad.iter().all(|(_, r)| r.code == ErrorCode::ToolFailure));
    }

    #[test]
    fn known_bad_is_retried_only_after_content_changes() {
        let fx = Fixture::new();
        let path = fx.write("a.pdf", "CORRUPT");
        fx.scan();
        let calls = extraction_calls(&fx.calls);

        let summary = fx.scan();
        assert_eq!(summary.known_bad, 1);
        assert_eq!(extraction_calls(&fx.calls), calls);

        fx.write("a.pdf", "fixed now");
        let summary = fx.scan();
        assert_eq!(summary.documents, 1);
        assert!(fx.catalog.bad_files().unwrap().is_empty());
        assert!(fx.catalog.location(&path).unwrap().is_some());
    }

    #[test]
    fn removed_files_are_swept() {
        let fx = Fixture::new();
        let keep = fx.write("keep.pdf", "stays");
        let gone = fx.write("gone.pdf", "leaves");
        fx.scan();

        std::fs::remove_file(&gone).unwrap();
        let summary = fx.scan();

        let removed = summary.removed.unwrap();
        assert_eq!(removed.document_locations, 1);
        assert_eq!(removed.documents, 1);
        assert!(fx.catalog.location(&keep).unwrap().is_some());
        assert!(fx.catalog.location(&gone).unwrap().is_none());
    }

    #[test]
    fn changed_size_triggers_reprocessing() {
        let fx = Fixture::new();
        let path = fx.write("a.pdf", "short");
        fx.scan();
        fx.write("a.pdf", "a much longer text");
        fx.scan();

        let (_, record) = fx.catalog.location(&path).unwrap().unwrap();
        let text = fx.catalog.document(&record.hash).unwrap().unwrap().text;
        assert_eq!(text, "a much longer text");
        assert_eq!(fx.catalog.documents().unwrap().len(), 1);
    }

    struct StopAfter(AtomicUsize);

    impl CancelSignal for StopAfter {
        fn should_stop(&self) -> bool {
            self.0.fetch_sub(1, Ordering::SeqCst) == 0
        }
    }

    #[test]
    fn cancelled_scan_skips_the_sweep() {
        let fx = Fixture::new();
        fx.write("a.pdf", "a");
        fx.write("b.pdf", "b");
        fx.scan();

        let cancel = StopAfter(AtomicUsize::new(1));
        let summary = Scanner::new(&fx.catalog, &fx.extractors, &fx.archives)
            .with_cancel(&cancel)
            .scan(&[fx.library.clone()])
            .unwrap();

        assert!(summary.cancelled);
        assert!(summary.removed.is_none());
        assert_eq!(fx.catalog.locations().unwrap().len(), 2);
    }

    #[test]
    fn archive_cut_short_is_walked_again() {
        let fx = Fixture::new();
        let zip = fx.write(
            "a.zip",
            &write_archive(&[("1.pdf", "one"), ("2.pdf", "two")]),
        );
        let first = format!("{zip}/1.pdf");
        let second = format!("{zip}/2.pdf");

        // a.zip and 1.pdf pass, the poll for 2.pdf stops the scan.
        let cancel = StopAfter(AtomicUsize::new(2));
        let summary = Scanner::new(&fx.catalog, &fx.extractors, &fx.archives)
            .with_cancel(&cancel)
            .scan(&[fx.library.clone()])
            .unwrap();
        assert!(summary.cancelled);
        assert!(fx.catalog.location(&first).unwrap().is_some());
        assert!(fx.catalog.location(&second).unwrap().is_none());
        assert!(fx.catalog.location(&zip).unwrap().is_none());

        let summary = fx.scan();
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.unchanged, 1);
        let (kind, archive) = fx.catalog.location(&zip).unwrap().unwrap();
        assert_eq!(kind, LocationKind::Archive);
        let (_, record) = fx.catalog.location(&second).unwrap().unwrap();
        assert_eq!(record.parent_archive_hash, Some(archive.hash));
        assert!(fx.scratch.read_dir().unwrap().next().is_none());
    }

    #[test]
    fn changed_archive_repoints_unchanged_children() {
        let fx = Fixture::new();
        let zip = fx.write("a.zip", &write_archive(&[("x.pdf", "x")]));
        let inner = format!("{zip}/x.pdf");
        fx.scan();
        let (_, old) = fx.catalog.location(&zip).unwrap().unwrap();

        fx.write("a.zip", &write_archive(&[("x.pdf", "x"), ("y.pdf", "y")]));
        let summary = fx.scan();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.removed.unwrap().archives, 1);

        let (_, new) = fx.catalog.location(&zip).unwrap().unwrap();
        assert_ne!(new.hash, old.hash);
        let (_, child) = fx.catalog.location(&inner).unwrap().unwrap();
        assert_eq!(child.parent_archive_hash.as_deref(), Some(new.hash.as_str()));
        assert!(fx.catalog.archive(&new.hash).unwrap().is_some());
        assert!(fx.catalog.archive(&old.hash).unwrap().is_none());
    }

    #[test]
    fn nested_archive_follows_its_changed_parent() {
        let fx = Fixture::new();
        let inner = write_archive(&[("deep.pdf", "deep")]);
        let outer =
            fx.write("outer.zip", &write_archive(&[("inner.zip", inner.as_str())]));
        fx.scan();

        fx.write(
            "outer.zip",
            &write_archive(&[
                ("inner.zip", inner.as_str()),
                ("extra.pdf", "more"),
            ]),
        );
        fx.scan();

        let (_, outer_row) = fx.catalog.location(&outer).unwrap().unwrap();
        let (_, inner_row) = fx
            .catalog
            .location(&format!("{outer}/inner.zip"))
            .unwrap()
            .unwrap();
        assert_eq!(inner_row.parent_archive_hash, Some(outer_row.hash));
        assert!(
            fx.catalog
                .location(&format!("{outer}/inner.zip/deep.pdf"))
                .unwrap()
                .is_some()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn undecodable_name_is_a_bad_file() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let fx = Fixture::new();
        let path = fx.library.join(OsStr::from_bytes(b"\xff.pdf"));
        std::fs::write(&path, "unnamed").unwrap();

        let summary = fx.scan();
        assert_eq!(summary.failed, 1);
        assert_eq!(extraction_calls(&fx.calls), 0);

        let lossy = format!("{}/\u{FFFD}.pdf", fx.library.display());
        let bad = fx.catalog.bad_files().unwrap();
        assert_eq!(bad.len(), 1);
        let (logical, record) = &bad[0];
        assert_eq!(logical, &lossy);
        assert_eq!(record.code, ErrorCode::BadName);
        assert_eq!(record.hash, hasher::hash_file(&path).unwrap());
        assert!(fx.catalog.location(&lossy).unwrap().is_none());
    }

    #[test]
    fn raised_flag_stops_before_the_first_file() {
        let fx = Fixture::new();
        fx.write("a.pdf", "a");

        let flag = AtomicBool::new(true);
        let summary = Scanner::new(&fx.catalog, &fx.extractors, &fx.archives)
            .with_cancel(&flag)
            .scan(&[fx.library.clone()])
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.files, 0);
        assert!(fx.catalog.locations().unwrap().is_empty());
    }
}
