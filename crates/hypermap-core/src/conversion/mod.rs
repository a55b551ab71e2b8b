//! Converters between message bodies (or raw strings) and typed values.
//!
//! A converter reports how well it fits a type and a message as a
//! [`CompatibilityLevel`]; the [`ConverterProvider`] picks the best one.
pub mod json;
pub mod provider;
pub mod text;
pub mod yaml;

// Internal imports (std, crate)
use std::fmt;
use std::ops::BitOr;

use crate::model::TypeInfo;
use crate::Result;

// External imports (alphabetized)
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use json::JsonConverter;
pub use provider::ConverterProvider;
pub use text::PlainTextConverter;
pub use yaml::YamlConverter;

/// Bit-flag score of a converter for a type and a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompatibilityLevel(u8);

impl CompatibilityLevel {
    pub const NONE: Self = Self(0);
    /// The converter can materialize the type.
    pub const EXACT_TYPE_MATCH: Self = Self(1);
    /// The message's media type is one the converter supports.
    pub const EXACT_PROTOCOL_MATCH: Self = Self(2);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CompatibilityLevel {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(Self::EXACT_TYPE_MATCH) {
            flags.push("ExactTypeMatch");
        }
        if self.contains(Self::EXACT_PROTOCOL_MATCH) {
            flags.push("ExactProtocolMatch");
        }
        if flags.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&flags.join(" | "))
        }
    }
}

/// Shape of the values a converter handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Plain values such as numbers and strings.
    Scalar,
    /// Objects and graphs of objects.
    Structured,
}

impl Representation {
    /// Representation required by a declared type.
    pub fn of(ty: &TypeInfo) -> Self {
        if ty.requires_structure() {
            Self::Structured
        } else {
            Self::Scalar
        }
    }
}

/// Reads typed values out of messages and writes them back.
///
/// "To" is message -> value, "from" is value -> message.
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Media types in preference order; the first is used by default.
    fn supported_media_types(&self) -> &[&'static str];

    fn representation(&self) -> Representation;

    /// Whether the converter can materialize values of `ty` at all.
    fn supports_type(&self, ty: &TypeInfo) -> bool;

    /// Score for reading `ty` from a message declaring `content_type`.
    fn can_convert_to(&self, ty: &TypeInfo, content_type: Option<&str>) -> CompatibilityLevel {
        score(self, ty, content_type.into_iter())
    }

    fn convert_to(&self, ty: &TypeInfo, body: &[u8]) -> Result<JsonValue>;

    /// Score for writing `ty` to a message accepting `accept`.
    fn can_convert_from(&self, ty: &TypeInfo, accept: &[String]) -> CompatibilityLevel {
        score(self, ty, accept.iter().map(String::as_str))
    }

    fn convert_from(&self, ty: &TypeInfo, value: &JsonValue) -> Result<Vec<u8>>;

    /// First supported media type satisfying one of the ranges.
    fn negotiated_media_type(&self, accept: &[String]) -> Option<&'static str> {
        accept.iter().find_map(|range| {
            self.supported_media_types()
                .iter()
                .copied()
                .find(|media_type| media_range_matches(range, media_type))
        })
    }
}

/// Type match, plus protocol match when any range names a supported type.
fn score<'a, C>(converter: &C, ty: &TypeInfo, mut ranges: impl Iterator<Item = &'a str>) -> CompatibilityLevel
where
    C: Converter + ?Sized,
{
    if !converter.supports_type(ty) {
        return CompatibilityLevel::NONE;
    }
    let protocol = ranges.any(|range| {
        converter
            .supported_media_types()
            .iter()
            .any(|media_type| media_range_matches(range, media_type))
    });
    if protocol {
        CompatibilityLevel::EXACT_TYPE_MATCH | CompatibilityLevel::EXACT_PROTOCOL_MATCH
    } else {
        CompatibilityLevel::EXACT_TYPE_MATCH
    }
}

/// `*/*`, `type/*` or an exact essence match.
pub fn media_range_matches(range: &str, media_type: &str) -> bool {
    let range = range.trim();
    if range == "*/*" {
        return true;
    }
    match range.strip_suffix("/*") {
        Some(kind) => media_type
            .split_once('/')
            .is_some_and(|(t, _)| t.eq_ignore_ascii_case(kind)),
        None => range.eq_ignore_ascii_case(media_type),
    }
}

/// Reject a decoded value whose shape does not fit the declared type.
pub(crate) fn check_shape(converter: &str, ty: &TypeInfo, value: JsonValue) -> Result<JsonValue> {
    if ty.accepts(&value) {
        Ok(value)
    } else {
        Err(crate::Error::conversion(format!(
            "{converter}: {value} is not a valid {ty}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_and_type_beats_type_alone() {
        let both = CompatibilityLevel::EXACT_TYPE_MATCH | CompatibilityLevel::EXACT_PROTOCOL_MATCH;
        assert!(both > CompatibilityLevel::EXACT_TYPE_MATCH);
        assert!(CompatibilityLevel::EXACT_TYPE_MATCH > CompatibilityLevel::NONE);
        assert!(both.contains(CompatibilityLevel::EXACT_PROTOCOL_MATCH));
        assert_eq!(both.to_string(), "ExactTypeMatch | ExactProtocolMatch");
        assert_eq!(CompatibilityLevel::NONE.to_string(), "None");
    }

    #[test]
    fn test_media_range_matches() {
        assert!(media_range_matches("*/*", "application/json"));
        assert!(media_range_matches("application/*", "application/json"));
        assert!(media_range_matches("Application/JSON", "application/json"));
        assert!(!media_range_matches("text/*", "application/json"));
        assert!(!media_range_matches("application/yaml", "application/json"));
    }

    #[test]
    fn test_representation_of_type() {
        assert_eq!(Representation::of(&TypeInfo::Integer), Representation::Scalar);
        assert_eq!(Representation::of(&TypeInfo::class("Person")), Representation::Structured);
        assert_eq!(
            Representation::of(&TypeInfo::collection_of(TypeInfo::class("Person"))),
            Representation::Structured
        );
    }
}
