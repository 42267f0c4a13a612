//! Lazy, memoized extraction of an indexable document from a stored blob.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::DocumentsConfig;
use crate::error::Result;
use crate::export::eml::sanitize_filename_part;
use crate::extract::fragment::fragment;
use crate::extract::handler::HandlerRegistry;
use crate::extract::tokens::{filename_tokens, join_content};
use crate::model::address::address_tokens;
use crate::model::document::IndexDocument;
use crate::store::blob::{Blob, BlobStore};
use crate::store::source::BlobDataSource;

/// Part name given to handlers for a standalone document.
pub const TOP_PART_NAME: &str = "top";

const MAX_FILENAME_LEN: usize = 255;

/// Metadata stored alongside a document blob.
#[derive(Debug, Clone, Default)]
pub struct DocumentMeta {
    pub filename: Option<String>,
    pub content_type: String,
    pub created: Option<DateTime<Utc>>,
    /// Raw creator address header value, e.g. `Ann <ann@example.com>`.
    pub creator: Option<String>,
    pub description: Option<String>,
}

impl DocumentMeta {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }
}

/// Result of the single extraction run.
#[derive(Debug)]
struct Extraction {
    text: String,
    fragment: String,
    document: IndexDocument,
    temporary_failure: bool,
}

/// A blob registered for indexing.
///
/// Text is extracted at most once, either at construction
/// (`instant_parsing`) or on first access. Concurrent first accessors block
/// until the one running extraction finishes; later reads see the memoized
/// result. Failures never make the document unusable: a temporary failure
/// sets [`has_temporary_analysis_failure`](Self::has_temporary_analysis_failure)
/// so the caller can retry later, any other failure leaves a document
/// indexed on its metadata alone.
pub struct ParsedDocument {
    blob: Blob,
    meta: DocumentMeta,
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn BlobStore>,
    fragment_length: usize,
    extraction: OnceLock<Extraction>,
    /// Zero means unset.
    version: AtomicU32,
}

impl ParsedDocument {
    pub fn new(
        blob: Blob,
        mut meta: DocumentMeta,
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn BlobStore>,
        config: &DocumentsConfig,
    ) -> Self {
        meta.filename = meta
            .filename
            .as_deref()
            .map(|f| sanitize_filename_part(f, MAX_FILENAME_LEN));

        let doc = Self {
            blob,
            meta,
            handlers,
            store,
            fragment_length: config.fragment_length,
            extraction: OnceLock::new(),
            version: AtomicU32::new(0),
        };
        if config.instant_parsing {
            doc.extraction();
        }
        doc
    }

    /// Store `input` as a blob first, then wrap it.
    pub fn from_stream(
        input: &mut dyn Read,
        meta: DocumentMeta,
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn BlobStore>,
        config: &DocumentsConfig,
    ) -> Result<Self> {
        let blob = store.store(input)?;
        Ok(Self::new(blob, meta, handlers, store, config))
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn digest(&self) -> &str {
        &self.blob.digest
    }

    pub fn size(&self) -> u64 {
        self.blob.size
    }

    pub fn filename(&self) -> Option<&str> {
        self.meta.filename.as_deref()
    }

    pub fn content_type(&self) -> &str {
        &self.meta.content_type
    }

    pub fn creator(&self) -> Option<&str> {
        self.meta.creator.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.meta.description.as_deref()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.meta.created
    }

    /// The version most recently set, if any.
    pub fn version(&self) -> Option<u32> {
        match self.version.load(Ordering::Acquire) {
            0 => None,
            v => Some(v),
        }
    }

    /// Stamp the document with a version. Takes effect whether or not
    /// extraction has already run.
    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }

    pub fn is_parsed(&self) -> bool {
        self.extraction.get().is_some()
    }

    /// Extracted text; empty after a failure.
    pub fn text(&self) -> &str {
        &self.extraction().text
    }

    pub fn fragment(&self) -> &str {
        &self.extraction().fragment
    }

    pub fn has_temporary_analysis_failure(&self) -> bool {
        self.extraction().temporary_failure
    }

    /// The index document, stamped with the current version.
    pub fn document(&self) -> IndexDocument {
        let mut document = self.extraction().document.clone();
        if let Some(version) = self.version() {
            document.version = Some(version);
        }
        document
    }

    pub fn document_list(&self) -> Vec<IndexDocument> {
        vec![self.document()]
    }

    fn extraction(&self) -> &Extraction {
        self.extraction.get_or_init(|| self.extract())
    }

    fn extract(&self) -> Extraction {
        let started = Instant::now();
        let filename = self.meta.filename.as_deref();
        let mut handler = self.handlers.resolve(&self.meta.content_type, filename);
        if handler.is_indexing_enabled() {
            handler.init(Box::new(BlobDataSource::new(
                self.blob.clone(),
                self.meta.content_type.clone(),
                Arc::clone(&self.store),
            )));
        }
        handler.set_filename(filename);
        handler.set_part_name(TOP_PART_NAME);
        handler.set_size(self.blob.size);

        let mut temporary_failure = false;
        let text = match panic::catch_unwind(AssertUnwindSafe(|| handler.content())) {
            Ok(Ok(text)) => text,
            Ok(Err(e)) if e.is_temporary() => {
                warn!(digest = %self.blob.digest, error = %e, "Temporary extraction failure");
                temporary_failure = true;
                String::new()
            }
            Ok(Err(e)) => {
                warn!(
                    digest = %self.blob.digest,
                    error = %e,
                    "Extraction failed, indexing metadata only"
                );
                String::new()
            }
            Err(_) => {
                warn!(digest = %self.blob.digest, "Extraction handler panicked, indexing metadata only");
                String::new()
            }
        };

        let tokens = filename.map(filename_tokens);
        let mut document = handler.document();
        document.subject = self.meta.filename.clone();
        document.filename = self.meta.filename.clone();
        document.content = join_content([
            filename,
            tokens.as_deref(),
            Some(text.as_str()),
            self.meta.description.as_deref(),
        ]);
        document.from = self
            .meta
            .creator
            .as_deref()
            .map(address_tokens)
            .filter(|t| !t.is_empty());
        if let Some(created) = self.meta.created {
            document.set_field("created", created.to_rfc3339());
        }

        debug!(
            digest = %self.blob.digest,
            content_type = %self.meta.content_type,
            bytes = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extracted document"
        );

        Extraction {
            fragment: fragment(&text, self.fragment_length),
            text,
            document,
            temporary_failure,
        }
    }
}

impl std::fmt::Debug for ParsedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedDocument")
            .field("blob", &self.blob)
            .field("meta", &self.meta)
            .field("parsed", &self.is_parsed())
            .field("version", &self.version())
            .finish()
    }
}
