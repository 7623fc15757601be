//! Stand-ins for the external unpack and conversion tools, shared by the
//! unit and integration tests.
//!
//! Archives are JSON maps from entry path to contents, whatever their
//! extension. Documents are read as plain text.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    archive::Unpacker,
    error::{Error, Result},
    extract::{ExtractLimits, Extractors, Recognizer, TextExtractor},
    kind::{ArchiveKind, DocumentKind},
};

/// Serialize an archive for [`ManifestUnpacker`]: a JSON map from entry
/// path to file contents.
pub fn write_archive(entries: &[(&str, &str)]) -> String {
    let map: BTreeMap<&str, &str> = entries.iter().copied().collect();
    serde_json::to_string(&map).unwrap_or_default()
}

fn read_manifest(archive: &Path) -> Result<BTreeMap<String, String>> {
    let bytes = std::fs::read(archive)?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Tool {
        tool: "manifest".to_string(),
        code: 2,
        output: e.to_string(),
    })
}

fn write_entry(dest: &Path, entry: &str, contents: &str) -> Result<()> {
    let path = dest.join(entry);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// Unpacks archives written by [`write_archive`], whatever their kind,
/// and counts full unpacks.
#[derive(Default)]
pub struct ManifestUnpacker {
    pub calls: Arc<AtomicUsize>,
}

impl Unpacker for ManifestUnpacker {
    fn unpack_all(
        &self,
        _kind: ArchiveKind,
        archive: &Path,
        dest: &Path,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (entry, contents) in read_manifest(archive)? {
            write_entry(dest, &entry, &contents)?;
        }
        Ok(())
    }

    fn unpack_one(
        &self,
        _kind: ArchiveKind,
        archive: &Path,
        inner: &str,
        dest: &Path,
    ) -> Result<()> {
        let manifest = read_manifest(archive)?;
        let contents = manifest.get(inner).ok_or_else(|| Error::Tool {
            tool: "manifest".to_string(),
            code: 11,
            output: format!("no entry {inner}"),
        })?;
        write_entry(dest, inner, contents)
    }
}

/// Reads documents as plain text; contents starting with `CORRUPT` fail.
#[derive(Clone, Default)]
pub struct PlainTextExtractor {
    pub calls: Arc<AtomicUsize>,
}

impl TextExtractor for PlainTextExtractor {
    fn page_count(&self, _path: &Path) -> Result<Option<u32>> {
        Ok(None)
    }

    fn page_text(&self, path: &Path, _page: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(path)?;
        if text.starts_with("CORRUPT") {
            return Err(Error::Tool {
                tool: "plaintext".to_string(),
                code: 1,
                output: "broken document".to_string(),
            });
        }
        Ok(text)
    }
}

/// A recognizer that always fails, so OCR fallback never succeeds.
pub struct NoOcr;

impl Recognizer for NoOcr {
    fn recognize(&self, _image: &Path) -> Result<String> {
        Err(Error::Extraction("no OCR in tests".into()))
    }
}

/// A registry that reads every document kind as plain text, and a counter
/// of extraction calls.
pub fn plain_extractors(workdir: &Path) -> (Extractors, Arc<AtomicUsize>) {
    let extractor = PlainTextExtractor::default();
    let calls = Arc::clone(&extractor.calls);
    let mut extractors = Extractors::new(
        Box::new(NoOcr),
        workdir,
        false,
        ExtractLimits::default(),
    );
    for kind in [
        DocumentKind::Djvu,
        DocumentKind::Pdf,
        DocumentKind::Doc,
        DocumentKind::Docx,
        DocumentKind::Odt,
        DocumentKind::Rtf,
        DocumentKind::Fb2,
    ] {
        extractors.register(kind, Box::new(extractor.clone()));
    }
    (extractors, calls)
}

pub fn extraction_calls(calls: &AtomicUsize) -> usize {
    calls.load(Ordering::SeqCst)
}
