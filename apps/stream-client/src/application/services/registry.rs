//! Transport Registry
//!
//! Which builder instantiates which [`TransportKind`]. The facade resolves
//! its candidate list against the registry once, at construction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::application::ports::{TransportBuilder, TransportOptions};
use crate::domain::connection::TransportKind;

/// Builders keyed by transport kind.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    builders: HashMap<TransportKind, Arc<dyn TransportBuilder>>,
}

impl TransportRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` for `kind`, replacing any earlier one.
    pub fn register(&mut self, kind: TransportKind, builder: Arc<dyn TransportBuilder>) {
        self.builders.insert(kind, builder);
    }

    /// Builder-style [`TransportRegistry::register`].
    #[must_use]
    pub fn with(mut self, kind: TransportKind, builder: Arc<dyn TransportBuilder>) -> Self {
        self.register(kind, builder);
        self
    }

    /// Get the builder for `kind`.
    #[must_use]
    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn TransportBuilder>> {
        self.builders.get(&kind).cloned()
    }

    /// Resolve `kinds` into candidates, in order, dropping kinds without a
    /// builder.
    #[must_use]
    pub fn candidates(&self, kinds: &[TransportKind]) -> Vec<TransportCandidate> {
        kinds
            .iter()
            .filter_map(|&kind| {
                let Some(builder) = self.get(kind) else {
                    tracing::debug!(transport = %kind, "No builder registered, skipping transport");
                    return None;
                };
                Some(TransportCandidate {
                    kind,
                    options: TransportOptions::defaults_for(kind),
                    builder,
                })
            })
            .collect()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.builders.keys().map(TransportKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("TransportRegistry").field("kinds", &kinds).finish()
    }
}

/// One entry of the facade's ordered candidate list.
#[derive(Clone)]
pub struct TransportCandidate {
    /// Transport name.
    pub kind: TransportKind,
    /// Default construction options.
    pub options: TransportOptions,
    /// Capability probe and constructor.
    pub builder: Arc<dyn TransportBuilder>,
}

impl fmt::Debug for TransportCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCandidate")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
