use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::{Error, Result},
    kind::DocumentKind,
    tool,
};

/// Characters replaced by spaces before text is stored.
const SEPARATORS: &[char] = &[
    '\\', '_', '"', '\'', '!', '#', '$', '%', '&', '(', ')', '*', '+', ',',
    '-', '/', ':', ';', '<', '=', '>', '?', '[', ']', '^', '`', '{', '|',
    '}', '~',
];

/// Everything the catalog stores about one piece of document content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub hash: String,
    pub size: u64,
    pub kind: DocumentKind,
    /// `None` for formats without a page structure.
    pub page_count: Option<u32>,
    /// Whether any sampled page had to go through OCR.
    pub ocr: bool,
    pub text: String,
}

/// Per-format access to a document's pages.
///
/// Page indices are zero-based.
pub trait TextExtractor {
    /// Number of pages, or `None` if the format is read as one block.
    fn page_count(&self, path: &Path) -> Result<Option<u32>>;

    /// The text layer of one page. Blank output means "no text layer".
    fn page_text(&self, path: &Path, page: u32) -> Result<String>;

    /// Render one page to an image inside `workdir` for OCR. Formats that
    /// cannot be rendered return `None`.
    fn page_image(
        &self,
        _path: &Path,
        _page: u32,
        _workdir: &Path,
    ) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Turns a page image into text.
pub trait Recognizer {
    fn recognize(&self, image: &Path) -> Result<String>;
}

/// OCR through `tesseract`.
#[derive(Debug, Clone)]
pub struct Tesseract {
    language: String,
}

impl Tesseract {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl Recognizer for Tesseract {
    fn recognize(&self, image: &Path) -> Result<String> {
        let args: &[&OsStr] = &[
            image.as_os_str(),
            "stdout".as_ref(),
            "-l".as_ref(),
            self.language.as_ref(),
        ];
        Ok(tool::run_checked("tesseract", args, None, &[0])?.output)
    }
}

static PDF_PAGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").expect("valid regex")
});

/// PDF through poppler-utils.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn page_count(&self, path: &Path) -> Result<Option<u32>> {
        let out = tool::run_checked("pdfinfo", [path], None, &[0])?;
        let pages = PDF_PAGES
            .captures(&out.output)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| {
                Error::Extraction("pdfinfo reported no page count".into())
            })?;
        Ok(Some(pages))
    }

    fn page_text(&self, path: &Path, page: u32) -> Result<String> {
        let n = (page + 1).to_string();
        let args: &[&OsStr] = &[
            "-q".as_ref(),
            "-f".as_ref(),
            n.as_ref(),
            "-l".as_ref(),
            n.as_ref(),
            path.as_os_str(),
            "-".as_ref(),
        ];
        Ok(tool::run_checked("pdftotext", args, None, &[0])?.output)
    }

    fn page_image(
        &self,
        path: &Path,
        page: u32,
        workdir: &Path,
    ) -> Result<Option<PathBuf>> {
        let n = (page + 1).to_string();
        let base = workdir.join(format!("pdf-page-{n}"));
        let args: &[&OsStr] = &[
            "-f".as_ref(),
            n.as_ref(),
            "-l".as_ref(),
            n.as_ref(),
            "-r".as_ref(),
            "300".as_ref(),
            "-singlefile".as_ref(),
            "-png".as_ref(),
            path.as_os_str(),
            base.as_os_str(),
        ];
        tool::run_checked("pdftoppm", args, None, &[0])?;
        Ok(Some(base.with_extension("png")))
    }
}

/// DjVu through djvulibre.
#[derive(Debug, Default, Clone, Copy)]
pub struct DjvuExtractor;

impl TextExtractor for DjvuExtractor {
    fn page_count(&self, path: &Path) -> Result<Option<u32>> {
        let args: &[&OsStr] =
            &["-e".as_ref(), "n".as_ref(), path.as_os_str()];
        let out = tool::run_checked("djvused", args, None, &[0])?;
        let pages = out.output.trim().parse().map_err(|_| {
            Error::Extraction(format!(
                "djvused reported an invalid page count: {}",
                out.output.trim()
            ))
        })?;
        Ok(Some(pages))
    }

    fn page_text(&self, path: &Path, page: u32) -> Result<String> {
        let page_arg = format!("--page={}", page + 1);
        let args: &[&OsStr] = &[page_arg.as_ref(), path.as_os_str()];
        Ok(tool::run_checked("djvutxt", args, None, &[0])?.output)
    }

    fn page_image(
        &self,
        path: &Path,
        page: u32,
        workdir: &Path,
    ) -> Result<Option<PathBuf>> {
        let image = workdir.join(format!("djvu-page-{}.pnm", page + 1));
        let page_arg = format!("-page={}", page + 1);
        let args: &[&OsStr] = &[
            "-format=pnm".as_ref(),
            page_arg.as_ref(),
            path.as_os_str(),
            image.as_os_str(),
        ];
        tool::run_checked("ddjvu", args, None, &[0])?;
        Ok(Some(image))
    }
}

/// Legacy Word documents through `antiword`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AntiwordExtractor;

impl TextExtractor for AntiwordExtractor {
    fn page_count(&self, _path: &Path) -> Result<Option<u32>> {
        Ok(None)
    }

    fn page_text(&self, path: &Path, _page: u32) -> Result<String> {
        Ok(tool::run_checked("antiword", [path], None, &[0])?.output)
    }
}

/// Any format pandoc can read, converted to plain text in one block.
#[derive(Debug, Clone, Copy)]
pub struct PandocExtractor {
    from: &'static str,
}

impl PandocExtractor {
    pub fn new(from: &'static str) -> Self {
        Self { from }
    }
}

impl TextExtractor for PandocExtractor {
    fn page_count(&self, _path: &Path) -> Result<Option<u32>> {
        Ok(None)
    }

    fn page_text(&self, path: &Path, _page: u32) -> Result<String> {
        let args: &[&OsStr] = &[
            "--from".as_ref(),
            self.from.as_ref(),
            "--to".as_ref(),
            "plain".as_ref(),
            path.as_os_str(),
        ];
        Ok(tool::run_checked("pandoc", args, None, &[0])?.output)
    }
}

/// Limits applied while sampling a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Pages sampled from the start of each document.
    pub max_pages: u32,
    /// Stored text is cut to this many characters.
    pub max_text_len: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_pages: 4,
            max_text_len: 1024,
        }
    }
}

/// Extractors keyed by document kind, plus the shared OCR fallback.
pub struct Extractors {
    by_kind: HashMap<DocumentKind, Box<dyn TextExtractor>>,
    ocr: Box<dyn Recognizer>,
    workdir: PathBuf,
    keep_artifacts: bool,
    limits: ExtractLimits,
}

impl Extractors {
    /// An empty registry. `workdir` receives page images for OCR.
    pub fn new(
        ocr: Box<dyn Recognizer>,
        workdir: impl Into<PathBuf>,
        keep_artifacts: bool,
        limits: ExtractLimits,
    ) -> Self {
        Self {
            by_kind: HashMap::new(),
            ocr,
            workdir: workdir.into(),
            keep_artifacts,
            limits,
        }
    }

    /// The command-line converters for every supported format.
    pub fn with_commands(
        language: &str,
        workdir: impl Into<PathBuf>,
        keep_artifacts: bool,
        limits: ExtractLimits,
    ) -> Self {
        let mut extractors = Self::new(
            Box::new(Tesseract::new(language)),
            workdir,
            keep_artifacts,
            limits,
        );
        extractors.register(DocumentKind::Pdf, Box::new(PdfExtractor));
        extractors.register(DocumentKind::Djvu, Box::new(DjvuExtractor));
        extractors.register(DocumentKind::Doc, Box::new(AntiwordExtractor));
        extractors
            .register(DocumentKind::Docx, Box::new(PandocExtractor::new("docx")));
        extractors
            .register(DocumentKind::Odt, Box::new(PandocExtractor::new("odt")));
        extractors
            .register(DocumentKind::Rtf, Box::new(PandocExtractor::new("rtf")));
        extractors
            .register(DocumentKind::Fb2, Box::new(PandocExtractor::new("fb2")));
        extractors
    }

    pub fn register(
        &mut self,
        kind: DocumentKind,
        extractor: Box<dyn TextExtractor>,
    ) {
        self.by_kind.insert(kind, extractor);
    }

    /// Sample, filter and truncate the text of one document.
    pub fn process(
        &self,
        path: &Path,
        kind: DocumentKind,
        hash: &str,
    ) -> Result<DocumentInfo> {
        let extractor = self.by_kind.get(&kind).ok_or_else(|| {
            Error::Unsupported(format!("no extractor registered for {kind}"))
        })?;

        let size = std::fs::metadata(path)?.len();
        let page_count = extractor.page_count(path)?;
        let sampled = match page_count {
            Some(n) => n.min(self.limits.max_pages),
            None => 1,
        };

        let mut raw = String::new();
        let mut ocr = false;
        for page in 0..sampled {
            let (text, page_ocr) =
                self.page_text(extractor.as_ref(), path, page)?;
            ocr |= page_ocr;
            raw.push(' ');
            raw.push_str(&text);
        }

        let text = truncate_text(&filter_text(&raw), self.limits.max_text_len);
        Ok(DocumentInfo {
            hash: hash.to_string(),
            size,
            kind,
            page_count,
            ocr,
            text,
        })
    }

    /// Text of one page, falling back to OCR when the text layer is blank.
    fn page_text(
        &self,
        extractor: &dyn TextExtractor,
        path: &Path,
        page: u32,
    ) -> Result<(String, bool)> {
        let text = extractor.page_text(path, page)?;
        if !text.trim().is_empty() {
            return Ok((text, false));
        }

        let Some(image) = extractor.page_image(path, page, &self.workdir)?
        else {
            return Ok((text, false));
        };
        tracing::debug!(
            path = %path.display(),
            page,
            "text layer empty; running OCR"
        );
        let recognized = self.ocr.recognize(&image);
        if !self.keep_artifacts
            && let Err(e) = std::fs::remove_file(&image)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %image.display(),
                error = %e,
                "failed to remove page image"
            );
        }
        Ok((recognized?, true))
    }
}

/// Replace punctuation and control characters with spaces and collapse
/// whitespace runs.
pub fn filter_text(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut `text` to at most `max_chars` characters, then back to the last
/// word boundary.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let head = &text[..cut];
    match head.rfind(' ') {
        Some(space) => head[..space].to_string(),
        None => head.to_string(),
    }
}
