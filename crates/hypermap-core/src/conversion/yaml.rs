//! YAML converter.

use super::{check_shape, Converter, Representation};
use crate::model::TypeInfo;
use crate::{Error, Result};

use serde_json::Value as JsonValue;

#[derive(Clone, Copy, Debug, Default)]
pub struct YamlConverter;

impl Converter for YamlConverter {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn supported_media_types(&self) -> &[&'static str] {
        &["application/yaml", "text/yaml"]
    }

    fn representation(&self) -> Representation {
        Representation::Structured
    }

    fn supports_type(&self, ty: &TypeInfo) -> bool {
        !matches!(ty, TypeInfo::Filter(_))
    }

    fn convert_to(&self, ty: &TypeInfo, body: &[u8]) -> Result<JsonValue> {
        let value: JsonValue = serde_yaml::from_slice(body)
            .map_err(|e| Error::conversion(format!("yaml: {e}")))?;
        check_shape(self.name(), ty, value)
    }

    fn convert_from(&self, _ty: &TypeInfo, value: &JsonValue) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }
}
