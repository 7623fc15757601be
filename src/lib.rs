//! bookkeeper - a catalog and full-text search for a personal document
//! library spread across nested archives.
//!
//! Library roots are walked recursively. Archives (zip, rar, 7z, tar.gz)
//! are unpacked into a scratch area and walked as if they were
//! directories, so a book inside `a.zip/b.rar` is known by the logical
//! path `/library/a.zip/b.rar/book.pdf`. Every file is identified by a
//! hash of its bytes: text is extracted once per distinct content, however
//! many copies exist. Each scan reconciles the catalog with the disk,
//! dropping locations whose files are gone.
//!
//! # Quick start
//!
//! ```no_run
//! use bookkeeper::{
//!     ArchiveExtractor, Catalog, CommandUnpacker, DataDir, Extractors,
//!     ScratchSpace, Scanner, SearchCache, extract::ExtractLimits,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let catalog = Catalog::open(&data_dir.catalog_db()).unwrap();
//! let scratch = "/mnt/ramdrive";
//! let extractors =
//!     Extractors::with_commands("eng", scratch, false, ExtractLimits::default());
//! let archives = ArchiveExtractor::new(
//!     Box::new(CommandUnpacker),
//!     ScratchSpace::new(scratch, false),
//! );
//!
//! Scanner::new(&catalog, &extractors, &archives)
//!     .scan(&["/home/me/books".into()])
//!     .unwrap();
//!
//! let cache = SearchCache::build(&catalog).unwrap();
//! for hit in cache.search(&["quantum", "field"]).unwrap() {
//!     println!("{} ({:.4})", hit.path, hit.relevance);
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod config;
pub mod data_dir;
pub mod error;
pub mod extract;
pub mod hasher;
pub mod kind;
pub mod scanner;
pub mod search;
pub mod terminator;
pub mod tool;

#[doc(hidden)]
pub mod testing;

pub use archive::{ArchiveExtractor, CommandUnpacker, ScratchSpace, Unpacker};
pub use catalog::Catalog;
pub use config::Config;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use extract::{DocumentInfo, Extractors, TextExtractor};
pub use kind::{ArchiveKind, DocumentKind, FileKind};
pub use scanner::{CancelSignal, ScanSummary, Scanner};
pub use search::{CacheHandle, SearchCache, SearchHit};
pub use terminator::Terminator;
