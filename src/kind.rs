use std::fmt;

use serde::{Deserialize, Serialize};

/// Book formats the catalog extracts text from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Djvu,
    Pdf,
    Doc,
    Docx,
    Odt,
    Rtf,
    Fb2,
}

/// Container formats the scanner descends into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    TarGz,
    Rar,
    Zip,
    SevenZ,
}

/// Classification of a file name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Document(DocumentKind),
    Archive(ArchiveKind),
}

impl FileKind {
    pub fn is_archive(self) -> bool {
        matches!(self, FileKind::Archive(_))
    }
}

/// Known suffixes. Multi-part suffixes come first so `.tar.gz` wins over
/// any shorter match.
const SUFFIXES: &[(&str, FileKind)] = &[
    (".tar.gz", FileKind::Archive(ArchiveKind::TarGz)),
    (".tgz", FileKind::Archive(ArchiveKind::TarGz)),
    (".rar", FileKind::Archive(ArchiveKind::Rar)),
    (".zip", FileKind::Archive(ArchiveKind::Zip)),
    (".7z", FileKind::Archive(ArchiveKind::SevenZ)),
    (".djvu", FileKind::Document(DocumentKind::Djvu)),
    (".djv", FileKind::Document(DocumentKind::Djvu)),
    (".pdf", FileKind::Document(DocumentKind::Pdf)),
    (".docx", FileKind::Document(DocumentKind::Docx)),
    (".doc", FileKind::Document(DocumentKind::Doc)),
    (".odt", FileKind::Document(DocumentKind::Odt)),
    (".rtf", FileKind::Document(DocumentKind::Rtf)),
    (".fb2", FileKind::Document(DocumentKind::Fb2)),
];

/// Classify a file by the suffix of its final path component.
///
/// Matching is case-insensitive. Returns `None` for anything that is
/// neither a document nor an archive.
pub fn classify(name: &str) -> Option<FileKind> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let lower = base.to_lowercase();
    SUFFIXES
        .iter()
        .find(|(suffix, _)| {
            lower.len() > suffix.len() && lower.ends_with(suffix)
        })
        .map(|&(_, kind)| kind)
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Djvu => "djvu",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Doc => "doc",
            DocumentKind::Docx => "docx",
            DocumentKind::Odt => "odt",
            DocumentKind::Rtf => "rtf",
            DocumentKind::Fb2 => "fb2",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveKind::TarGz => "targz",
            ArchiveKind::Rar => "rar",
            ArchiveKind::Zip => "zip",
            ArchiveKind::SevenZ => "7z",
        };
        f.write_str(name)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Document(kind) => kind.fmt(f),
            FileKind::Archive(kind) => kind.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_by_extension() {
        assert_eq!(
            classify("book.pdf"),
            Some(FileKind::Document(DocumentKind::Pdf))
        );
        assert_eq!(
            classify("scan.djv"),
            Some(FileKind::Document(DocumentKind::Djvu))
        );
        assert_eq!(
            classify("notes.docx"),
            Some(FileKind::Document(DocumentKind::Docx))
        );
        assert_eq!(
            classify("notes.doc"),
            Some(FileKind::Document(DocumentKind::Doc))
        );
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(
            classify("BOOK.PDF"),
            Some(FileKind::Document(DocumentKind::Pdf))
        );
        assert_eq!(
            classify("Backup.Zip"),
            Some(FileKind::Archive(ArchiveKind::Zip))
        );
    }

    #[test]
    fn tar_gz_beats_shorter_suffixes() {
        assert_eq!(
            classify("library.tar.gz"),
            Some(FileKind::Archive(ArchiveKind::TarGz))
        );
        // A bare .gz is not a known container.
        assert_eq!(classify("library.gz"), None);
    }

    #[test]
    fn only_the_last_component_counts() {
        assert_eq!(classify("outer.zip/readme.txt"), None);
        assert_eq!(
            classify("outer.zip/inner.rar"),
            Some(FileKind::Archive(ArchiveKind::Rar))
        );
    }

    #[test]
    fn unknown_and_bare_suffixes_are_misc() {
        assert_eq!(classify("cover.jpg"), None);
        assert_eq!(classify("README"), None);
        assert_eq!(classify(".pdf"), None);
    }
}
