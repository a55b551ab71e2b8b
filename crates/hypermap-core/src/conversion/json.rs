//! JSON converter.

use super::{check_shape, Converter, Representation};
use crate::model::TypeInfo;
use crate::{Error, Result};

use serde_json::Value as JsonValue;

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supported_media_types(&self) -> &[&'static str] {
        &["application/json", "text/json"]
    }

    fn representation(&self) -> Representation {
        Representation::Structured
    }

    fn supports_type(&self, ty: &TypeInfo) -> bool {
        !matches!(ty, TypeInfo::Filter(_))
    }

    fn convert_to(&self, ty: &TypeInfo, body: &[u8]) -> Result<JsonValue> {
        let value: JsonValue = serde_json::from_slice(body)
            .map_err(|e| Error::conversion(format!("json: {e}")))?;
        check_shape(self.name(), ty, value)
    }

    fn convert_from(&self, _ty: &TypeInfo, value: &JsonValue) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_typed_values() -> Result<()> {
        let converter = JsonConverter;
        let person = converter.convert_to(&TypeInfo::class("Person"), br#"{"name":"Ann"}"#)?;
        assert_eq!(person, json!({"name": "Ann"}));
        let ids = converter.convert_to(&TypeInfo::collection_of(TypeInfo::Integer), b"[1,2]")?;
        assert_eq!(ids, json!([1, 2]));
        assert!(converter.convert_to(&TypeInfo::Integer, br#""x""#).is_err());
        assert!(converter.convert_to(&TypeInfo::Integer, b"{").is_err());
        Ok(())
    }

    #[test]
    fn test_accepts_text_json() {
        let converter = JsonConverter;
        let level = converter.can_convert_from(&TypeInfo::Integer, &["text/json".to_string()]);
        assert!(level.contains(super::super::CompatibilityLevel::EXACT_PROTOCOL_MATCH));
        assert_eq!(
            converter.negotiated_media_type(&["text/*".to_string()]),
            Some("text/json")
        );
    }
}
