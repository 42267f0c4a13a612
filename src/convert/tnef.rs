//! Expansion of TNEF attachments.
//!
//! A TNEF part is replaced by a `multipart/alternative` holding, in order,
//! the untouched original, the decoded content as `multipart/mixed`, and
//! optionally a `text/calendar` part for meeting requests. A message whose
//! whole body is TNEF gets the same treatment and is marked
//! `generated=true`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CachedFile, DecodeCache};
use crate::error::{MimeError, Result};
use crate::model::mime::{
    BodyPart, ContentType, LeafContent, Message, MimeNode, Multipart, CT_MULTIPART_ALTERNATIVE,
    CT_TEXT_CALENDAR, DISPOSITION_ATTACHMENT,
};
use crate::tnef::{is_tnef_type, CollectingSink, TnefCalendarAdapter, TnefDecoder};
use crate::visitor::{
    ConversionContext, MimeVisitor, VisitPhase, VisitorFactory, VisitorSettings,
};

/// Registry name of the TNEF converter.
pub const NAME: &str = "tnef";

pub struct TnefConverter {
    settings: VisitorSettings,
    ctx: ConversionContext,
    decoder: Arc<dyn TnefDecoder>,
    calendar: Option<Arc<dyn TnefCalendarAdapter>>,
    cache: Option<Arc<DecodeCache>>,
}

/// Where the payload of a TNEF part is read from.
enum Payload<'a> {
    Cached(CachedFile),
    Memory(&'a [u8]),
}

impl Payload<'_> {
    fn reader(&self) -> std::io::Result<Box<dyn Read + '_>> {
        match self {
            Payload::Cached(file) => Ok(Box::new(BufReader::new(File::open(&file.path)?))),
            Payload::Memory(bytes) => Ok(Box::new(*bytes)),
        }
    }
}

fn is_tnef_leaf(part: &BodyPart) -> bool {
    matches!(part.content, LeafContent::Bytes(_)) && is_tnef_type(part.content_type().essence())
}

impl TnefConverter {
    pub fn new(settings: VisitorSettings, ctx: ConversionContext, decoder: Arc<dyn TnefDecoder>) -> Self {
        Self {
            settings,
            ctx,
            decoder,
            calendar: None,
            cache: None,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn TnefCalendarAdapter>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_cache(mut self, cache: Arc<DecodeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn payload<'a>(&self, part: &'a BodyPart) -> Payload<'a> {
        if let (Some(cache), Some(identity)) = (&self.cache, self.ctx.identity()) {
            match cache.materialize(identity, part) {
                Ok(file) => return Payload::Cached(file),
                Err(e) => warn!(error = %e, "Decode cache unavailable, decoding from memory"),
            }
        }
        Payload::Memory(part.bytes())
    }

    /// Decode `part` into the alternative structure, minus the original.
    ///
    /// Returns `Ok(None)` when the payload cannot be decoded. Only a
    /// calendar failure is an error.
    pub fn expand(&self, part: &BodyPart) -> Result<Option<Multipart>> {
        let payload = self.payload(part);

        let decoder = Arc::clone(&self.decoder);
        let decoded = catch_unwind(AssertUnwindSafe(|| -> Result<Message> {
            let mut reader = payload.reader()?;
            Ok(decoder.decode(&mut reader)?)
        }));
        let converted = match decoded {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(error = %e, filename = ?part.filename(), "Could not decode TNEF attachment");
                return Ok(None);
            }
            Err(_) => {
                warn!(filename = ?part.filename(), "TNEF decoder panicked, leaving part unconverted");
                return Ok(None);
            }
        };

        let mut mixed = match *converted.content {
            MimeNode::Multipart(mp) => mp,
            leaf @ MimeNode::Leaf(_) => {
                let mut mp = Multipart::new("mixed");
                mp.add_part(leaf);
                mp
            }
        };
        for child in &mut mixed.parts {
            if !child.headers().contains("Content-Disposition") {
                child
                    .headers_mut()
                    .set("Content-Disposition", DISPOSITION_ATTACHMENT);
            }
        }

        let mut alternative = Multipart::new("alternative");
        alternative.add_part(MimeNode::Multipart(mixed));

        if let Some(calendar) = &self.calendar {
            if let Some(part) = self.calendar_part(calendar.as_ref(), &payload)? {
                alternative.add_part(MimeNode::Leaf(part));
            }
        }
        Ok(Some(alternative))
    }

    fn calendar_part(
        &self,
        adapter: &dyn TnefCalendarAdapter,
        payload: &Payload<'_>,
    ) -> Result<Option<BodyPart>> {
        let mut sink = CollectingSink::default();
        let mut reader = payload
            .reader()
            .map_err(|e| MimeError::Calendar(e.to_string()))?;
        let converted = adapter
            .convert(&self.ctx, &mut reader, &mut sink)
            .map_err(|e| match e {
                MimeError::Calendar(_) => e,
                other => MimeError::Calendar(other.to_string()),
            })?;
        if !converted || sink.calendars.is_empty() {
            return Ok(None);
        }

        let mut ctype = ContentType::new(CT_TEXT_CALENDAR).with_param("charset", "utf-8");
        if let Some(method) = sink.calendars[0].method() {
            ctype.set_param("method", method);
        }
        let ics: String = sink.calendars.iter().map(|c| c.to_ics()).collect();
        debug!(calendars = sink.calendars.len(), "Synthesized calendar part");
        Ok(Some(BodyPart::new(&ctype.to_string(), ics.into_bytes())))
    }
}

impl MimeVisitor for TnefConverter {
    fn settings(&self) -> &VisitorSettings {
        &self.settings
    }

    fn visit_message(&mut self, message: &mut Message, phase: VisitPhase) -> Result<bool> {
        if phase != VisitPhase::End {
            return Ok(false);
        }
        let MimeNode::Leaf(part) = message.content.as_ref() else {
            return Ok(false);
        };
        if !is_tnef_leaf(part) {
            return Ok(false);
        }

        let Some(alternative) = self.expand(part)? else {
            return Ok(false);
        };
        if !self.settings.check_modification() {
            return Ok(false);
        }

        let original = message.set_content(MimeNode::Multipart(alternative));
        if let MimeNode::Multipart(alternative) = message.content.as_mut() {
            alternative.insert_part(0, original);
            let ctype = alternative.content_type().with_param("generated", "true");
            alternative.set_content_type(&ctype);
        }
        Ok(true)
    }

    fn visit_multipart(&mut self, multipart: &mut Multipart, phase: VisitPhase) -> Result<bool> {
        if phase != VisitPhase::End {
            return Ok(false);
        }
        // Keyed on the content type alone, so an alternative that was not
        // generated here is skipped too, even if it holds raw TNEF.
        if multipart.content_type().essence() == CT_MULTIPART_ALTERNATIVE {
            return Ok(false);
        }

        let mut replaced = false;
        for index in 0..multipart.parts.len() {
            let MimeNode::Leaf(part) = &multipart.parts[index] else {
                continue;
            };
            if !is_tnef_leaf(part) {
                continue;
            }

            let alternative = match self.expand(part) {
                Ok(Some(alternative)) => alternative,
                Ok(None) => continue,
                Err(e) if e.is_message_fatal() => return Err(e),
                Err(e) => {
                    warn!(index, error = %e, "TNEF expansion failed, skipping part");
                    continue;
                }
            };
            if !self.settings.check_modification() {
                continue;
            }

            let original = multipart.remove_part(index);
            let mut alternative = alternative;
            alternative.insert_part(0, original);
            multipart.insert_part(index, MimeNode::Multipart(alternative));
            replaced = true;
        }
        Ok(replaced)
    }
}

/// Builds [`TnefConverter`] passes from shared collaborators.
pub struct TnefConverterFactory {
    max_depth: usize,
    decoder: Arc<dyn TnefDecoder>,
    calendar: Option<Arc<dyn TnefCalendarAdapter>>,
    cache: Option<Arc<DecodeCache>>,
}

impl TnefConverterFactory {
    pub fn new(
        max_depth: usize,
        decoder: Arc<dyn TnefDecoder>,
        calendar: Option<Arc<dyn TnefCalendarAdapter>>,
        cache: Option<Arc<DecodeCache>>,
    ) -> Self {
        Self {
            max_depth,
            decoder,
            calendar,
            cache,
        }
    }
}

impl VisitorFactory for TnefConverterFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn create(&self, ctx: &ConversionContext) -> Box<dyn MimeVisitor + Send> {
        let mut converter = TnefConverter::new(
            ctx.settings(self.max_depth),
            ctx.clone(),
            Arc::clone(&self.decoder),
        );
        if let Some(calendar) = &self.calendar {
            converter = converter.with_calendar(Arc::clone(calendar));
        }
        if let Some(cache) = &self.cache {
            converter = converter.with_cache(Arc::clone(cache));
        }
        Box::new(converter)
    }
}
