//! The library fixture shared by the integration tests. Tool fakes come
//! from `bookkeeper::testing`.

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicUsize},
};

use bookkeeper::{
    ArchiveExtractor,
    Catalog,
    Extractors,
    ScanSummary,
    Scanner,
    ScratchSpace,
    testing::{ManifestUnpacker, extraction_calls, plain_extractors},
};

pub use bookkeeper::testing::write_archive as archive;

/// A library directory, a scratch area and a catalog in one temp dir.
pub struct Library {
    _tmp: tempfile::TempDir,
    pub root: PathBuf,
    pub scratch: PathBuf,
    pub catalog: Catalog,
    pub extractors: Extractors,
    pub archives: ArchiveExtractor,
    extractions: Arc<AtomicUsize>,
    unpacks: Arc<AtomicUsize>,
}

impl Library {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("library");
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        let root = root.canonicalize().unwrap();

        let (extractors, extractions) = plain_extractors(&scratch);
        let unpacker = ManifestUnpacker::default();
        let unpacks = Arc::clone(&unpacker.calls);
        let archives = ArchiveExtractor::new(
            Box::new(unpacker),
            ScratchSpace::new(&scratch, false),
        );

        let catalog = Catalog::open(&tmp.path().join("catalog.redb")).unwrap();
        Self {
            _tmp: tmp,
            root,
            scratch,
            catalog,
            extractors,
            archives,
            extractions,
            unpacks,
        }
    }

    /// Write a file below the library root and return its logical path.
    pub fn write(&self, relative: &str, contents: &str) -> String {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        self.logical(relative)
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.root.join(relative)).unwrap();
    }

    pub fn logical(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root.display())
    }

    pub fn scan(&self) -> ScanSummary {
        Scanner::new(&self.catalog, &self.extractors, &self.archives)
            .scan(&[self.root.clone()])
            .unwrap()
    }

    pub fn extractions(&self) -> usize {
        extraction_calls(&self.extractions)
    }

    pub fn unpacks(&self) -> usize {
        extraction_calls(&self.unpacks)
    }

    /// Scratch entries other than the directory of opened files.
    pub fn leftover_scratch(&self) -> Vec<String> {
        std::fs::read_dir(&self.scratch)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != bookkeeper::archive::OPENED_DIR)
            .collect()
    }
}
