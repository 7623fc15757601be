use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::{catalog::Catalog, error::Result, kind::DocumentKind};

/// A match inside a document's text, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One search result row: a matching document at one of its locations.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub hash: String,
    pub in_archive: bool,
    pub relevance: f64,
    pub kind: DocumentKind,
    pub text: String,
    pub spans: Vec<Span>,
}

impl SearchHit {
    /// Text around the first match, with up to `context` characters on
    /// either side.
    pub fn snippet(&self, context: usize) -> &str {
        let Some(first) = self.spans.first() else {
            return "";
        };
        let start = match context.checked_sub(1) {
            Some(skip) => self.text[..first.start]
                .char_indices()
                .rev()
                .nth(skip)
                .map_or(0, |(i, _)| i),
            None => first.start,
        };
        let end = self.text[first.end..]
            .char_indices()
            .nth(context)
            .map_or(self.text.len(), |(i, _)| first.end + i);
        &self.text[start..end]
    }
}

struct CachedDocument {
    hash: String,
    kind: DocumentKind,
    text: String,
    text_chars: usize,
}

struct DocumentMatch<'a> {
    document: &'a CachedDocument,
    relevance: f64,
    spans: Vec<Span>,
}

struct Term {
    pattern: Regex,
    chars: usize,
}

/// In-memory projection of the catalog's documents for ranked search.
///
/// The cache is a snapshot; it does not notice later catalog changes.
#[derive(Default)]
pub struct SearchCache {
    documents: Vec<CachedDocument>,
    paths_by_hash: HashMap<String, Vec<String>>,
    parent_by_path: HashMap<String, Option<String>>,
}

impl SearchCache {
    pub fn build(catalog: &Catalog) -> Result<Self> {
        let documents = catalog
            .documents()?
            .into_iter()
            .map(|(hash, record)| CachedDocument {
                hash,
                kind: record.kind,
                text_chars: record.text.chars().count(),
                text: record.text,
            })
            .collect();

        let mut paths_by_hash: HashMap<String, Vec<String>> = HashMap::new();
        let mut parent_by_path = HashMap::new();
        for (path, location) in catalog.document_locations()? {
            paths_by_hash
                .entry(location.hash)
                .or_default()
                .push(path.clone());
            parent_by_path.insert(path, location.parent_archive_hash);
        }

        Ok(Self {
            documents,
            paths_by_hash,
            parent_by_path,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents containing every term, most relevant first, one row per
    /// location.
    ///
    /// Terms match case-insensitively as literal text. A document's
    /// relevance for one term is `matches * term_chars / (text_chars + 1)`;
    /// relevances of several terms multiply.
    pub fn search(&self, terms: &[&str]) -> Result<Vec<SearchHit>> {
        let terms = terms
            .iter()
            .filter(|term| !term.is_empty())
            .map(|term| -> Result<Term> {
                let pattern = RegexBuilder::new(&regex::escape(term))
                    .case_insensitive(true)
                    .build()?;
                Ok(Term {
                    pattern,
                    chars: term.chars().count(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<DocumentMatch<'_>> = self
            .documents
            .par_iter()
            .filter_map(|document| match_all(document, &terms))
            .collect();
        matches.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| a.document.hash.cmp(&b.document.hash))
        });

        Ok(matches
            .into_iter()
            .flat_map(|m| self.expand(m))
            .collect())
    }

    fn expand(&self, m: DocumentMatch<'_>) -> Vec<SearchHit> {
        let Some(paths) = self.paths_by_hash.get(&m.document.hash) else {
            return Vec::new();
        };
        let mut paths = paths.clone();
        paths.sort();

        paths
            .into_iter()
            .map(|path| SearchHit {
                in_archive: self
                    .parent_by_path
                    .get(&path)
                    .is_some_and(Option::is_some),
                path,
                hash: m.document.hash.clone(),
                relevance: m.relevance,
                kind: m.document.kind,
                text: m.document.text.clone(),
                spans: m.spans.clone(),
            })
            .collect()
    }
}

fn match_all<'a>(
    document: &'a CachedDocument,
    terms: &[Term],
) -> Option<DocumentMatch<'a>> {
    let mut relevance = 1.0;
    let mut spans = Vec::new();
    for term in terms {
        let found: Vec<Span> = term
            .pattern
            .find_iter(&document.text)
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
            })
            .collect();
        if found.is_empty() {
            return None;
        }
        relevance *= (found.len() * term.chars) as f64
            / (document.text_chars + 1) as f64;
        spans.extend(found);
    }
    spans.sort();
    spans.dedup();
    Some(DocumentMatch {
        document,
        relevance,
        spans,
    })
}

/// Shared access to the current [`SearchCache`].
///
/// Queries work on a snapshot; [`refresh`](Self::refresh) builds a new
/// cache and swaps it in, so running queries keep the old one.
pub struct CacheHandle {
    current: RwLock<Arc<SearchCache>>,
}

impl CacheHandle {
    pub fn new(cache: SearchCache) -> Self {
        Self {
            current: RwLock::new(Arc::new(cache)),
        }
    }

    pub fn load(catalog: &Catalog) -> Result<Self> {
        Ok(Self::new(SearchCache::build(catalog)?))
    }

    pub fn refresh(&self, catalog: &Catalog) -> Result<()> {
        let fresh = Arc::new(SearchCache::build(catalog)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<SearchCache> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }
}
