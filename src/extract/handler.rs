//! Content-type specific text extraction handlers.
//!
//! A [`HandlerRegistry`] picks a handler for a content type and filename.
//! Each resolution yields a fresh handler, which is annotated with the part
//! it describes, initialized with a [`DataSource`] when it indexes content,
//! and then asked for its text.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use crate::error::HandlerError;
use crate::model::document::IndexDocument;
use crate::model::mime::{ContentType, CT_TEXT_HTML, CT_TEXT_PLAIN};
use crate::parser::header::decode_charset;
use crate::parser::mime::html_to_text;
use crate::store::source::DataSource;

/// Extracts indexable text from one kind of content.
pub trait MimeHandler: Send {
    /// Whether this handler reads the content at all.
    fn is_indexing_enabled(&self) -> bool;

    fn init(&mut self, source: Box<dyn DataSource>);
    fn set_filename(&mut self, filename: Option<&str>);
    fn set_part_name(&mut self, part_name: &str);
    fn set_size(&mut self, size: u64);

    /// Extracted text; empty when the handler does not index content.
    fn content(&mut self) -> Result<String, HandlerError>;

    /// The handler's base document, with part-level fields filled in.
    fn document(&self) -> IndexDocument;
}

/// Annotations shared by the built-in handlers.
#[derive(Default)]
struct PartInfo {
    source: Option<Box<dyn DataSource>>,
    filename: Option<String>,
    part_name: Option<String>,
    size: Option<u64>,
    content_type: String,
}

impl PartInfo {
    fn new(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            ..Default::default()
        }
    }

    fn read_all(&self) -> Result<Vec<u8>, HandlerError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| HandlerError::Failed("handler not initialized".into()))?;
        let mut reader = source
            .open()
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Decode using the content type's charset, UTF-8 by default.
    fn read_text(&self) -> Result<String, HandlerError> {
        let bytes = self.read_all()?;
        let source_type = self
            .source
            .as_ref()
            .map(|s| s.content_type().to_string())
            .unwrap_or_else(|| self.content_type.clone());
        let charset = ContentType::parse(&source_type)
            .param("charset")
            .unwrap_or("utf-8")
            .to_string();
        Ok(decode_charset(&charset, &bytes))
    }

    fn document(&self) -> IndexDocument {
        IndexDocument {
            content_type: Some(ContentType::parse(&self.content_type).essence().to_string()),
            part_name: self.part_name.clone(),
            size: self.size,
            filename: self.filename.clone(),
            ..Default::default()
        }
    }
}

macro_rules! delegate_part_info {
    () => {
        fn init(&mut self, source: Box<dyn DataSource>) {
            self.info.source = Some(source);
        }

        fn set_filename(&mut self, filename: Option<&str>) {
            self.info.filename = filename.map(str::to_string);
        }

        fn set_part_name(&mut self, part_name: &str) {
            self.info.part_name = Some(part_name.to_string());
        }

        fn set_size(&mut self, size: u64) {
            self.info.size = Some(size);
        }

        fn document(&self) -> IndexDocument {
            self.info.document()
        }
    };
}

/// `text/plain` and other charset-tagged text.
pub struct TextHandler {
    info: PartInfo,
}

impl TextHandler {
    pub fn new(content_type: &str) -> Self {
        Self {
            info: PartInfo::new(content_type),
        }
    }
}

impl MimeHandler for TextHandler {
    fn is_indexing_enabled(&self) -> bool {
        true
    }

    delegate_part_info!();

    fn content(&mut self) -> Result<String, HandlerError> {
        self.info.read_text()
    }
}

/// `text/html`, reduced to plain text.
pub struct HtmlHandler {
    info: PartInfo,
}

impl HtmlHandler {
    pub fn new(content_type: &str) -> Self {
        Self {
            info: PartInfo::new(content_type),
        }
    }
}

impl MimeHandler for HtmlHandler {
    fn is_indexing_enabled(&self) -> bool {
        true
    }

    delegate_part_info!();

    fn content(&mut self) -> Result<String, HandlerError> {
        Ok(html_to_text(&self.info.read_text()?))
    }
}

/// Fallback for content nothing else understands: metadata only.
pub struct UnknownHandler {
    info: PartInfo,
}

impl UnknownHandler {
    pub fn new(content_type: &str) -> Self {
        Self {
            info: PartInfo::new(content_type),
        }
    }
}

impl MimeHandler for UnknownHandler {
    fn is_indexing_enabled(&self) -> bool {
        false
    }

    delegate_part_info!();

    fn content(&mut self) -> Result<String, HandlerError> {
        Ok(String::new())
    }
}

/// Creates a handler for the given content type.
pub type HandlerFactory = Arc<dyn Fn(&str) -> Box<dyn MimeHandler> + Send + Sync>;

/// Resolves handlers by exact content type, then filename extension, then `type/*`.
#[derive(Clone)]
pub struct HandlerRegistry {
    by_type: HashMap<String, HandlerFactory>,
    by_extension: HashMap<String, HandlerFactory>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let text: HandlerFactory =
            Arc::new(|ct: &str| Box::new(TextHandler::new(ct)) as Box<dyn MimeHandler>);
        let html: HandlerFactory =
            Arc::new(|ct: &str| Box::new(HtmlHandler::new(ct)) as Box<dyn MimeHandler>);
        registry.register_type(CT_TEXT_PLAIN, Arc::clone(&text));
        registry.register_type("text/*", Arc::clone(&text));
        registry.register_type(CT_TEXT_HTML, Arc::clone(&html));
        for ext in ["txt", "log", "csv", "md", "ics"] {
            registry.register_extension(ext, Arc::clone(&text));
        }
        for ext in ["htm", "html"] {
            registry.register_extension(ext, Arc::clone(&html));
        }
        registry
    }
}

impl HandlerRegistry {
    /// A registry that resolves everything to [`UnknownHandler`].
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            by_extension: HashMap::new(),
        }
    }

    /// Register for an exact essence (`text/plain`) or a wildcard (`text/*`).
    pub fn register_type(&mut self, content_type: &str, factory: HandlerFactory) {
        self.by_type
            .insert(content_type.to_ascii_lowercase(), factory);
    }

    pub fn register_extension(&mut self, extension: &str, factory: HandlerFactory) {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            factory,
        );
    }

    pub fn resolve(&self, content_type: &str, filename: Option<&str>) -> Box<dyn MimeHandler> {
        let ctype = ContentType::parse(content_type);
        let essence = ctype.essence();
        let wildcard = format!("{}/*", ctype.primary());
        let extension = filename
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        let factory = self
            .by_type
            .get(essence)
            .or_else(|| extension.as_ref().and_then(|e| self.by_extension.get(e)))
            .or_else(|| self.by_type.get(&wildcard));

        match factory {
            Some(factory) => factory(content_type),
            None => {
                debug!(content_type = essence, ?filename, "No handler, using metadata only");
                Box::new(UnknownHandler::new(content_type))
            }
        }
    }
}
