//! Converter registry and negotiation.

// Internal imports (std, crate)
use std::fmt;
use std::sync::Arc;

use super::{CompatibilityLevel, Converter, JsonConverter, PlainTextConverter, Representation, YamlConverter};
use crate::model::TypeInfo;

// External imports (alphabetized)
use log::debug;

/// Ordered set of converters; registration order breaks score ties.
#[derive(Clone)]
pub struct ConverterProvider {
    converters: Vec<Arc<dyn Converter>>,
}

impl fmt::Debug for ConverterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.converters.iter().map(|c| c.name()))
            .finish()
    }
}

impl Default for ConverterProvider {
    /// Plain text, JSON and YAML, in that order.
    fn default() -> Self {
        Self::empty()
            .with(PlainTextConverter)
            .with(JsonConverter)
            .with(YamlConverter)
    }
}

impl ConverterProvider {
    pub fn empty() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    pub fn with<C: Converter + 'static>(mut self, converter: C) -> Self {
        self.register(Arc::new(converter));
        self
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.converters.push(converter);
    }

    pub fn converters(&self) -> impl Iterator<Item = &dyn Converter> {
        self.converters.iter().map(|c| c.as_ref())
    }

    /// Best converter for reading `ty`. With `ignore_protocol` only type
    /// compatibility is scored, as for raw URL and query strings.
    pub fn find_input(
        &self,
        ty: &TypeInfo,
        content_type: Option<&str>,
        ignore_protocol: bool,
    ) -> Option<&dyn Converter> {
        let content_type = if ignore_protocol { None } else { content_type };
        let found = best(self.converters(), |c| c.can_convert_to(ty, content_type));
        debug!(
            "input negotiation for {ty} ({content_type:?}): {:?}",
            found.map(|c| c.name())
        );
        found
    }

    /// Best converter for writing `ty` plus the response media type.
    ///
    /// Ranges are tried in the order the client listed them; within a range
    /// the usual scoring applies. Only converters matching a range qualify.
    pub fn find_output(&self, ty: &TypeInfo, accept: &[String]) -> Option<(&dyn Converter, &'static str)> {
        let found = accept.iter().find_map(|range| {
            let range = std::slice::from_ref(range);
            best(self.converters(), |c| {
                let level = c.can_convert_from(ty, range);
                if level.contains(CompatibilityLevel::EXACT_PROTOCOL_MATCH) {
                    level
                } else {
                    CompatibilityLevel::NONE
                }
            })
            .and_then(|c| c.negotiated_media_type(range).map(|m| (c, m)))
        });
        debug!(
            "output negotiation for {ty} ({accept:?}): {:?}",
            found.map(|(c, m)| (c.name(), m))
        );
        found
    }

    /// Every media type of the converters handling `representation`.
    pub fn media_types(&self, representation: Representation) -> Vec<String> {
        let mut media_types: Vec<String> = Vec::new();
        for converter in self.converters().filter(|c| c.representation() == representation) {
            for media_type in converter.supported_media_types() {
                if !media_types.iter().any(|m| m == media_type) {
                    media_types.push(media_type.to_string());
                }
            }
        }
        media_types
    }
}

/// Highest score wins; on ties the earliest converter is kept. `None` when
/// nothing scores above `NONE`.
fn best<'a, I, F>(converters: I, mut score: F) -> Option<&'a dyn Converter>
where
    I: Iterator<Item = &'a dyn Converter>,
    F: FnMut(&dyn Converter) -> CompatibilityLevel,
{
    let mut winner: Option<(&'a dyn Converter, CompatibilityLevel)> = None;
    for converter in converters {
        let level = score(converter);
        if level.is_none() {
            continue;
        }
        if winner.map_or(true, |(_, best)| level > best) {
            winner = Some((converter, level));
        }
    }
    winner.map(|(converter, _)| converter)
}
