//! `text/plain` converter for scalar values.

use super::{check_shape, Converter, Representation};
use crate::model::TypeInfo;
use crate::{Error, Result};

use serde_json::{Number, Value as JsonValue};

/// Reads and writes single scalar values as plain text. Also the converter
/// chosen for raw URL and query strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextConverter;

impl Converter for PlainTextConverter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supported_media_types(&self) -> &[&'static str] {
        &["text/plain"]
    }

    fn representation(&self) -> Representation {
        Representation::Scalar
    }

    fn supports_type(&self, ty: &TypeInfo) -> bool {
        ty.is_scalar()
    }

    fn convert_to(&self, ty: &TypeInfo, body: &[u8]) -> Result<JsonValue> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::conversion(format!("text: body is not UTF-8: {e}")))?;
        let invalid = || Error::conversion(format!("text: '{text}' is not a valid {ty}"));
        let trimmed = text.trim();
        let value = match ty {
            TypeInfo::String => JsonValue::String(text.to_string()),
            TypeInfo::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => JsonValue::Bool(true),
                "false" => JsonValue::Bool(false),
                _ => return Err(invalid()),
            },
            TypeInfo::Integer => match trimmed.parse::<i64>() {
                Ok(n) => JsonValue::from(n),
                Err(_) => JsonValue::from(trimmed.parse::<u64>().map_err(|_| invalid())?),
            },
            TypeInfo::Number => {
                let n = trimmed.parse::<f64>().map_err(|_| invalid())?;
                JsonValue::Number(Number::from_f64(n).ok_or_else(invalid)?)
            }
            _ => {
                return Err(Error::conversion(format!(
                    "text: cannot read a {ty} from plain text"
                )))
            }
        };
        check_shape(self.name(), ty, value)
    }

    fn convert_from(&self, ty: &TypeInfo, value: &JsonValue) -> Result<Vec<u8>> {
        let text = match value {
            JsonValue::Null => String::new(),
            JsonValue::String(s) => s.clone(),
            JsonValue::Bool(_) | JsonValue::Number(_) => value.to_string(),
            _ => {
                return Err(Error::conversion(format!(
                    "text: a {ty} value cannot be written as plain text"
                )))
            }
        };
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::CompatibilityLevel;
    use serde_json::json;

    #[test]
    fn test_reads_scalars() -> Result<()> {
        let text = PlainTextConverter;
        assert_eq!(text.convert_to(&TypeInfo::Integer, b"42")?, json!(42));
        assert_eq!(text.convert_to(&TypeInfo::Number, b" 1.5 ")?, json!(1.5));
        assert_eq!(text.convert_to(&TypeInfo::Boolean, b"TRUE")?, json!(true));
        assert_eq!(text.convert_to(&TypeInfo::String, b"a b")?, json!("a b"));
        assert!(text.convert_to(&TypeInfo::Integer, b"forty-two").is_err());
        assert!(text.convert_to(&TypeInfo::class("Person"), b"{}").is_err());
        Ok(())
    }

    #[test]
    fn test_writes_scalars_only() -> Result<()> {
        let text = PlainTextConverter;
        assert_eq!(text.convert_from(&TypeInfo::Integer, &json!(42))?, b"42".to_vec());
        assert_eq!(text.convert_from(&TypeInfo::String, &json!("hi"))?, b"hi".to_vec());
        assert!(text.convert_from(&TypeInfo::class("Person"), &json!({"a": 1})).is_err());
        Ok(())
    }

    #[test]
    fn test_scores() {
        let text = PlainTextConverter;
        assert_eq!(
            text.can_convert_to(&TypeInfo::Integer, None),
            CompatibilityLevel::EXACT_TYPE_MATCH
        );
        assert_eq!(
            text.can_convert_to(&TypeInfo::Integer, Some("text/plain")),
            CompatibilityLevel::EXACT_TYPE_MATCH | CompatibilityLevel::EXACT_PROTOCOL_MATCH
        );
        assert!(text.can_convert_to(&TypeInfo::class("Person"), Some("text/plain")).is_none());
    }
}
