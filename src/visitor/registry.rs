//! Ordered registries of transformation passes.
//!
//! Converters run whenever a message is read or indexed and their changes
//! are never stored. Mutators run before a message is stored or sent.
//! Each run creates a fresh pass instance from its factory.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{MimeVisitor, ModificationCallback, Visited, VisitorSettings};
use crate::cache::DecodeCache;
use crate::config::Config;
use crate::convert::{TnefConverterFactory, UuencodeConverterFactory};
use crate::error::Result;
use crate::model::mime::Message;
use crate::tnef::{BasicTnefCalendar, BasicTnefDecoder, TnefCalendarAdapter, TnefDecoder};

/// Per-run information handed to pass factories.
#[derive(Clone, Default)]
pub struct ConversionContext {
    identity: Option<String>,
    callback: Option<Arc<dyn ModificationCallback>>,
}

impl fmt::Debug for ConversionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionContext")
            .field("identity", &self.identity)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ConversionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the message being converted, used to track decode
    /// cache references.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ModificationCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Settings for a pass created in this context.
    pub fn settings(&self, max_depth: usize) -> VisitorSettings {
        VisitorSettings {
            max_depth,
            callback: self.callback.clone(),
        }
    }
}

/// Creates pass instances. `name` identifies the pass for unregistration.
pub trait VisitorFactory: Send + Sync {
    fn name(&self) -> &str;
    fn create(&self, ctx: &ConversionContext) -> Box<dyn MimeVisitor + Send>;
}

/// Collaborators shared by the built-in converters.
#[derive(Clone)]
pub struct ConverterServices {
    pub decoder: Arc<dyn TnefDecoder>,
    pub calendar: Option<Arc<dyn TnefCalendarAdapter>>,
    pub cache: Option<Arc<DecodeCache>>,
}

impl Default for ConverterServices {
    fn default() -> Self {
        Self {
            decoder: Arc::new(BasicTnefDecoder::default()),
            calendar: Some(Arc::new(BasicTnefCalendar::default())),
            cache: None,
        }
    }
}

impl ConverterServices {
    /// Built-in decoder and calendar adapter, limited per `config`.
    pub fn from_config(config: &Config, cache: Option<Arc<DecodeCache>>) -> Self {
        let decoder = BasicTnefDecoder::new()
            .with_max_attribute_len(config.converters.tnef_max_attribute_len);
        Self {
            decoder: Arc::new(decoder.clone()),
            calendar: Some(Arc::new(BasicTnefCalendar::new(decoder))),
            cache,
        }
    }
}

/// Converters and mutators, each in registration order.
///
/// Registering a factory twice is allowed and runs the pass twice.
#[derive(Clone, Default)]
pub struct VisitorRegistry {
    converters: Vec<Arc<dyn VisitorFactory>>,
    mutators: Vec<Arc<dyn VisitorFactory>>,
}

impl fmt::Debug for VisitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitorRegistry")
            .field("converters", &names(&self.converters))
            .field("mutators", &names(&self.mutators))
            .finish()
    }
}

fn names(list: &[Arc<dyn VisitorFactory>]) -> Vec<&str> {
    list.iter().map(|f| f.name()).collect()
}

impl VisitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the converters enabled in `config`.
    pub fn from_config(config: &Config, services: &ConverterServices) -> Self {
        let mut registry = Self::new();
        let max_depth = config.converters.max_depth;
        if config.converters.uuencode {
            registry.register_converter(Arc::new(UuencodeConverterFactory::new(max_depth)));
        }
        if config.converters.tnef {
            let calendar = if config.converters.tnef_to_icalendar {
                services.calendar.clone()
            } else {
                None
            };
            registry.register_converter(Arc::new(TnefConverterFactory::new(
                max_depth,
                Arc::clone(&services.decoder),
                calendar,
                services.cache.clone(),
            )));
        }
        registry
    }

    pub fn register_converter(&mut self, factory: Arc<dyn VisitorFactory>) {
        debug!(name = factory.name(), "Registering MIME converter");
        self.converters.push(factory);
    }

    /// Remove the first converter named `name`. Returns whether one was found.
    pub fn unregister_converter(&mut self, name: &str) -> bool {
        debug!(name, "Unregistering MIME converter");
        remove_first(&mut self.converters, name)
    }

    pub fn register_mutator(&mut self, factory: Arc<dyn VisitorFactory>) {
        debug!(name = factory.name(), "Registering MIME mutator");
        self.mutators.push(factory);
    }

    /// Remove the first mutator named `name`. Returns whether one was found.
    pub fn unregister_mutator(&mut self, name: &str) -> bool {
        debug!(name, "Unregistering MIME mutator");
        remove_first(&mut self.mutators, name)
    }

    pub fn converters(&self) -> &[Arc<dyn VisitorFactory>] {
        &self.converters
    }

    pub fn mutators(&self) -> &[Arc<dyn VisitorFactory>] {
        &self.mutators
    }

    pub fn any_converters_registered(&self) -> bool {
        !self.converters.is_empty()
    }

    pub fn any_mutators_registered(&self) -> bool {
        !self.mutators.is_empty()
    }
}

fn remove_first(list: &mut Vec<Arc<dyn VisitorFactory>>, name: &str) -> bool {
    match list.iter().position(|f| f.name() == name) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

/// Run every registered converter over `message`, in order.
pub fn run_converters(
    registry: &VisitorRegistry,
    ctx: &ConversionContext,
    message: Message,
) -> Result<Visited> {
    run_all(registry.converters(), ctx, message)
}

/// Run every registered mutator over `message`, in order.
pub fn run_mutators(
    registry: &VisitorRegistry,
    ctx: &ConversionContext,
    message: Message,
) -> Result<Visited> {
    run_all(registry.mutators(), ctx, message)
}

fn run_all(
    factories: &[Arc<dyn VisitorFactory>],
    ctx: &ConversionContext,
    mut message: Message,
) -> Result<Visited> {
    let mut modified = false;
    for factory in factories {
        let mut pass = factory.create(ctx);
        let visited = pass.accept(message)?;
        if visited.modified {
            info!(pass = factory.name(), identity = ?ctx.identity(), "MIME pass modified message");
        }
        modified |= visited.modified;
        message = visited.message;
    }
    Ok(Visited { message, modified })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mime::{BodyPart, Headers, MimeNode};
    use crate::visitor::VisitPhase;

    /// Appends an `X-Seen` header on every run.
    struct Stamp {
        settings: VisitorSettings,
    }

    impl MimeVisitor for Stamp {
        fn settings(&self) -> &VisitorSettings {
            &self.settings
        }

        fn visit_message(&mut self, m: &mut Message, phase: VisitPhase) -> Result<bool> {
            if phase == VisitPhase::End && self.settings.check_modification() {
                m.headers.append("X-Seen", "1");
                return Ok(true);
            }
            Ok(false)
        }
    }

    struct StampFactory(&'static str);

    impl VisitorFactory for StampFactory {
        fn name(&self) -> &str {
            self.0
        }

        fn create(&self, ctx: &ConversionContext) -> Box<dyn MimeVisitor + Send> {
            Box::new(Stamp {
                settings: ctx.settings(10),
            })
        }
    }

    fn message() -> Message {
        Message::new(
            Headers::new(),
            MimeNode::Leaf(BodyPart::new("text/plain", b"hi".to_vec())),
        )
    }

    #[test]
    fn test_duplicate_registration_runs_twice() {
        let mut registry = VisitorRegistry::new();
        let factory: Arc<dyn VisitorFactory> = Arc::new(StampFactory("stamp"));
        registry.register_converter(Arc::clone(&factory));
        registry.register_converter(factory);
        assert_eq!(registry.converters().len(), 2);

        let visited = run_converters(&registry, &ConversionContext::new(), message()).unwrap();
        assert!(visited.modified);
        assert_eq!(visited.message.headers.iter().filter(|(k, _)| *k == "X-Seen").count(), 2);
    }

    #[test]
    fn test_unregister_removes_first_match_only() {
        let mut registry = VisitorRegistry::new();
        registry.register_mutator(Arc::new(StampFactory("a")));
        registry.register_mutator(Arc::new(StampFactory("b")));
        registry.register_mutator(Arc::new(StampFactory("a")));
        assert!(registry.unregister_mutator("a"));
        assert_eq!(names(registry.mutators()), vec!["b", "a"]);
        assert!(!registry.unregister_mutator("missing"));
        assert!(!registry.any_converters_registered());
        assert!(registry.any_mutators_registered());
    }

    #[test]
    fn test_converters_and_mutators_are_separate() {
        let mut registry = VisitorRegistry::new();
        registry.register_mutator(Arc::new(StampFactory("stamp")));
        let visited = run_converters(&registry, &ConversionContext::new(), message()).unwrap();
        assert!(!visited.modified);
        let visited = run_mutators(&registry, &ConversionContext::new(), message()).unwrap();
        assert!(visited.modified);
    }

    #[test]
    fn test_from_config_respects_flags() {
        let mut config = Config::default();
        let mut registry = VisitorRegistry::from_config(&config, &ConverterServices::default());
        assert_eq!(names(registry.converters()), vec!["uuencode", "tnef"]);
        assert!(registry.unregister_converter("tnef"));
        assert_eq!(names(registry.converters()), vec!["uuencode"]);

        config.converters.uuencode = false;
        config.converters.tnef = false;
        let registry = VisitorRegistry::from_config(&config, &ConverterServices::default());
        assert!(!registry.any_converters_registered());
    }

    #[test]
    fn test_context_veto_reaches_pass() {
        let mut registry = VisitorRegistry::new();
        registry.register_converter(Arc::new(StampFactory("stamp")));
        let ctx = ConversionContext::new().with_callback(Arc::new(|| false));
        let visited = run_converters(&registry, &ctx, message()).unwrap();
        assert!(!visited.modified);
    }
}
