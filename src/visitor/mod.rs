//! Depth-first MIME tree traversal with typed callbacks.
//!
//! A pass implements [`MimeVisitor`] and is run with [`MimeVisitor::accept`],
//! which takes ownership of the message, walks it and hands it back along
//! with whether anything changed. Containers get a `Begin` and an `End`
//! callback; leaves get one. Changes bubble up: a multipart whose subtree
//! changed is refreshed, an embedded message is re-encoded, and the root
//! message is committed once.

pub mod registry;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::mime::{BodyPart, LeafContent, Message, MimeNode, Multipart};

pub use registry::{
    run_converters, run_mutators, ConversionContext, ConverterServices, VisitorFactory,
    VisitorRegistry,
};

/// Nesting depth at which traversal stops descending.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Whether a container callback runs before or after its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPhase {
    Begin,
    End,
}

/// Consulted immediately before a pass rewrites the tree.
///
/// Returning `false` vetoes that one rewrite; the traversal carries on.
pub trait ModificationCallback: Send + Sync {
    fn on_modification(&self) -> bool;
}

impl<F> ModificationCallback for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn on_modification(&self) -> bool {
        self()
    }
}

/// Per-pass traversal settings.
#[derive(Clone)]
pub struct VisitorSettings {
    pub max_depth: usize,
    pub callback: Option<Arc<dyn ModificationCallback>>,
}

impl Default for VisitorSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            callback: None,
        }
    }
}

impl fmt::Debug for VisitorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitorSettings")
            .field("max_depth", &self.max_depth)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl VisitorSettings {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ModificationCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Whether a rewrite may proceed. Always true without a callback.
    pub fn check_modification(&self) -> bool {
        self.callback
            .as_ref()
            .map_or(true, |cb| cb.on_modification())
    }
}

/// Result of a traversal: the (possibly rewritten) message.
#[derive(Debug)]
pub struct Visited {
    pub message: Message,
    pub modified: bool,
}

/// A transformation pass over a MIME tree.
///
/// Every callback defaults to "nothing changed", so a pass only overrides
/// the node kinds it cares about.
pub trait MimeVisitor {
    fn settings(&self) -> &VisitorSettings;

    fn visit_message(&mut self, _message: &mut Message, _phase: VisitPhase) -> Result<bool> {
        Ok(false)
    }

    fn visit_multipart(&mut self, _multipart: &mut Multipart, _phase: VisitPhase) -> Result<bool> {
        Ok(false)
    }

    /// Called for every non-message leaf, including a message's own content
    /// when it is a single leaf. A pass that replaces single-leaf content in
    /// `visit_message` should not also rewrite it here.
    fn visit_body_part(&mut self, _part: &mut BodyPart) -> Result<bool> {
        Ok(false)
    }

    /// Walk `message` depth-first and return it with the modified flag.
    ///
    /// Taking `&mut self` keeps one instance from running two traversals
    /// at once.
    fn accept(&mut self, mut message: Message) -> Result<Visited> {
        let modified = walk_message(self, &mut message, 0)?;
        Ok(Visited { message, modified })
    }
}

fn walk_message<V: MimeVisitor + ?Sized>(
    visitor: &mut V,
    message: &mut Message,
    depth: usize,
) -> Result<bool> {
    if depth >= visitor.settings().max_depth {
        debug!(depth, "Maximum MIME nesting reached, not descending");
        return Ok(false);
    }

    let mut modified = visitor.visit_message(message, VisitPhase::Begin)?;
    modified |= walk_node(visitor, &mut message.content, depth)?;
    modified |= visitor.visit_message(message, VisitPhase::End)?;

    if modified {
        message.save_changes();
    }
    Ok(modified)
}

fn walk_node<V: MimeVisitor + ?Sized>(
    visitor: &mut V,
    node: &mut MimeNode,
    depth: usize,
) -> Result<bool> {
    if depth >= visitor.settings().max_depth {
        debug!(depth, "Maximum MIME nesting reached, not descending");
        return Ok(false);
    }

    match node {
        MimeNode::Multipart(multipart) => walk_multipart(visitor, multipart, depth),
        MimeNode::Leaf(part) => match &mut part.content {
            LeafContent::Message(embedded) => {
                let modified = walk_message(visitor, embedded, depth + 1)?;
                if modified {
                    part.invalidate();
                }
                Ok(modified)
            }
            LeafContent::Bytes(_) => visitor.visit_body_part(part),
        },
    }
}

fn walk_multipart<V: MimeVisitor + ?Sized>(
    visitor: &mut V,
    multipart: &mut Multipart,
    depth: usize,
) -> Result<bool> {
    let mut modified = visitor.visit_multipart(multipart, VisitPhase::Begin)?;

    for (index, child) in multipart.parts.iter_mut().enumerate() {
        match walk_node(visitor, child, depth + 1) {
            Ok(changed) => modified |= changed,
            Err(e) if e.is_message_fatal() => return Err(e),
            Err(e) => warn!(index, error = %e, "Could not visit body subpart, skipping"),
        }
    }

    modified |= visitor.visit_multipart(multipart, VisitPhase::End)?;

    if modified {
        multipart.refresh();
    }
    Ok(modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MimeError;
    use crate::model::mime::Headers;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records callback order and optionally rewrites every leaf.
    #[derive(Default)]
    struct Recorder {
        settings: VisitorSettings,
        events: Vec<String>,
        rewrite: bool,
        fail_on: Option<&'static str>,
    }

    impl MimeVisitor for Recorder {
        fn settings(&self) -> &VisitorSettings {
            &self.settings
        }

        fn visit_message(&mut self, _m: &mut Message, phase: VisitPhase) -> Result<bool> {
            self.events.push(format!("message:{phase:?}"));
            Ok(false)
        }

        fn visit_multipart(&mut self, mp: &mut Multipart, phase: VisitPhase) -> Result<bool> {
            self.events
                .push(format!("{}:{phase:?}", mp.content_type().essence()));
            Ok(false)
        }

        fn visit_body_part(&mut self, part: &mut BodyPart) -> Result<bool> {
            let essence = part.content_type().essence().to_string();
            self.events.push(essence.clone());
            if self.fail_on == Some("calendar") && essence == "text/calendar" {
                return Err(MimeError::Calendar("boom".into()));
            }
            if self.fail_on == Some("parse") && essence == "text/html" {
                return Err(MimeError::Parse("boom".into()));
            }
            if self.rewrite && self.settings.check_modification() {
                part.set_bytes(b"rewritten".to_vec());
                return Ok(true);
            }
            Ok(false)
        }
    }

    fn leaf(ct: &str) -> MimeNode {
        MimeNode::Leaf(BodyPart::new(ct, b"x".to_vec()))
    }

    fn mixed(parts: Vec<MimeNode>) -> Message {
        let mut mp = Multipart::new("mixed");
        for p in parts {
            mp.add_part(p);
        }
        Message::new(Headers::new(), MimeNode::Multipart(mp))
    }

    #[test]
    fn test_callback_order() {
        let msg = mixed(vec![leaf("text/plain"), leaf("text/html")]);
        let mut rec = Recorder::default();
        let visited = rec.accept(msg).unwrap();
        assert!(!visited.modified);
        assert_eq!(
            rec.events,
            vec![
                "message:Begin",
                "multipart/mixed:Begin",
                "text/plain",
                "text/html",
                "multipart/mixed:End",
                "message:End",
            ]
        );
    }

    #[test]
    fn test_top_level_leaf_is_dispatched_once() {
        let msg = Message::new(Headers::new(), leaf("text/plain"));
        let mut rec = Recorder {
            rewrite: true,
            ..Default::default()
        };
        let visited = rec.accept(msg).unwrap();
        assert!(visited.modified);
        assert_eq!(rec.events, vec!["message:Begin", "text/plain", "message:End"]);
        let part = visited.message.content.as_leaf().unwrap();
        assert_eq!(part.bytes(), b"rewritten");
    }

    #[test]
    fn test_modification_bubbles_and_commits() {
        let msg = mixed(vec![leaf("text/plain")]);
        let mut rec = Recorder {
            rewrite: true,
            ..Default::default()
        };
        let visited = rec.accept(msg).unwrap();
        assert!(visited.modified);
        assert_eq!(visited.message.headers.get("MIME-Version").as_deref(), Some("1.0"));
        let mp = visited.message.content.as_multipart().unwrap();
        assert_eq!(mp.parts[0].as_leaf().unwrap().bytes(), b"rewritten");
    }

    #[test]
    fn test_callback_veto() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut rec = Recorder {
            rewrite: true,
            settings: VisitorSettings::default().with_callback(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            })),
            ..Default::default()
        };
        let visited = rec
            .accept(mixed(vec![leaf("text/plain"), leaf("text/plain")]))
            .unwrap();
        assert!(!visited.modified);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_embedded_message_is_visited() {
        let inner = mixed(vec![leaf("text/plain")]);
        let outer = mixed(vec![MimeNode::Leaf(BodyPart::with_message(inner))]);
        let mut rec = Recorder {
            rewrite: true,
            ..Default::default()
        };
        let visited = rec.accept(outer).unwrap();
        assert!(visited.modified);
        assert_eq!(
            rec.events
                .iter()
                .filter(|e| e.as_str() == "message:Begin")
                .count(),
            2
        );
    }

    #[test]
    fn test_depth_cap_stops_descent() {
        let mut node = leaf("text/plain");
        for _ in 0..10 {
            let mut mp = Multipart::new("mixed");
            mp.add_part(node);
            node = MimeNode::Multipart(mp);
        }
        let msg = Message::new(Headers::new(), node);
        let mut rec = Recorder {
            rewrite: true,
            settings: VisitorSettings::default().with_max_depth(5),
            ..Default::default()
        };
        let visited = rec.accept(msg).unwrap();
        assert!(!visited.modified);
        assert!(!rec.events.iter().any(|e| e == "text/plain"));
    }

    #[test]
    fn test_child_error_skips_only_that_child() {
        let msg = mixed(vec![leaf("text/html"), leaf("text/plain")]);
        let mut rec = Recorder {
            rewrite: true,
            fail_on: Some("parse"),
            ..Default::default()
        };
        let visited = rec.accept(msg).unwrap();
        assert!(visited.modified);
        assert!(rec.events.contains(&"text/plain".to_string()));
    }

    #[test]
    fn test_calendar_error_propagates() {
        let msg = mixed(vec![leaf("text/calendar"), leaf("text/plain")]);
        let mut rec = Recorder {
            fail_on: Some("calendar"),
            ..Default::default()
        };
        let err = rec.accept(msg).unwrap_err();
        assert!(matches!(err, MimeError::Calendar(_)));
    }
}
