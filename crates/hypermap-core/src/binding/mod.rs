//! Argument binding: turning a matched request into [`Arguments`].
//!
//! Each argument is read according to its source. Body arguments go through
//! the converter negotiated for the request's content type; URL segment and
//! query arguments are extracted with the argument's sub-template and coerced
//! from raw strings. Filter-typed arguments are parsed into a
//! [`FilterExpression`] instead.
pub mod filter;

// Internal imports (std, crate)
use std::sync::Arc;

use crate::conversion::ConverterProvider;
use crate::http::RequestInfo;
use crate::model::{
    ArgumentInfo, ArgumentSource, Arguments, BoundValue, OperationInfo, TypeCatalog, TypeInfo,
};
use crate::{Error, Result};

pub use filter::FilterExpression;

// External imports (alphabetized)
use log::trace;
use serde_json::Value as JsonValue;

/// Binds operation arguments from requests.
#[derive(Clone, Debug)]
pub struct ArgumentBinder {
    converters: Arc<ConverterProvider>,
}

impl Default for ArgumentBinder {
    fn default() -> Self {
        Self::new(Arc::new(ConverterProvider::default()))
    }
}

impl ArgumentBinder {
    pub fn new(converters: Arc<ConverterProvider>) -> Self {
        Self { converters }
    }

    pub fn converters(&self) -> &Arc<ConverterProvider> {
        &self.converters
    }

    /// Bind every argument of `operation`, failing on the first one that
    /// cannot be bound.
    pub fn bind(
        &self,
        operation: &OperationInfo,
        request: &RequestInfo,
        catalog: &TypeCatalog,
    ) -> Result<Arguments> {
        let mut arguments = Arguments::new();
        for (index, argument) in operation.arguments().iter().enumerate() {
            let bound = match argument.source() {
                ArgumentSource::Body => self.bind_body(argument, request)?,
                ArgumentSource::UrlSegment | ArgumentSource::QueryString => {
                    let raw = operation
                        .argument_template(index)
                        .map(|t| t.extract(request.route_path(), request.query()))
                        .unwrap_or_default();
                    self.bind_raw(argument, raw, catalog)?
                }
            };
            let value = match bound {
                Some(value) => value,
                None => missing(argument)?,
            };
            trace!("bound {} = {value:?}", argument.name());
            arguments.insert(argument.name(), value);
        }
        Ok(arguments)
    }

    fn bind_body(&self, argument: &ArgumentInfo, request: &RequestInfo) -> Result<Option<BoundValue>> {
        if request.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let ty = &argument.parameter().ty;
        let content_type = request.content_type();
        let converter = self
            .converters
            .find_input(ty, content_type.as_deref(), false)
            .ok_or_else(|| {
                Error::binding(
                    argument.name(),
                    format!("no converter reads {ty} from {content_type:?}"),
                )
            })?;
        let value = converter
            .convert_to(ty, &request.body)
            .map_err(|e| Error::binding(argument.name(), e.to_string()))?;
        Ok(Some(BoundValue::Json(value)))
    }

    /// Coerce raw strings taken from the path or query.
    pub fn bind_raw(
        &self,
        argument: &ArgumentInfo,
        raw: Vec<String>,
        catalog: &TypeCatalog,
    ) -> Result<Option<BoundValue>> {
        let ty = &argument.parameter().ty;
        let mut raw: Vec<String> = match (argument.source(), ty.is_collection()) {
            (ArgumentSource::UrlSegment, true) => raw
                .iter()
                .flat_map(|v| v.split(','))
                .map(str::to_string)
                .collect(),
            _ => raw,
        };
        if !matches!(ty.item_type(), TypeInfo::String) {
            raw.retain(|v| !v.trim().is_empty());
        }
        if raw.is_empty() {
            return Ok(None);
        }

        if let TypeInfo::Filter(class) = ty {
            let source = raw.join(" and ");
            let filter = FilterExpression::parse(&source, catalog.get(class).map(|c| c.as_ref()))
                .map_err(|e| Error::binding(argument.name(), e.to_string()))?;
            return Ok(Some(BoundValue::Filter(filter)));
        }

        let value = if ty.is_collection() {
            let item = ty.item_type();
            let items = raw
                .iter()
                .map(|value| self.coerce(argument, item, value))
                .collect::<Result<Vec<_>>>()?;
            JsonValue::Array(items)
        } else {
            if raw.len() > 1 {
                trace!("{} received {} values, using the first", argument.name(), raw.len());
            }
            self.coerce(argument, ty, &raw[0])?
        };
        Ok(Some(BoundValue::Json(value)))
    }

    fn coerce(&self, argument: &ArgumentInfo, ty: &TypeInfo, raw: &str) -> Result<JsonValue> {
        let converter = self.converters.find_input(ty, None, true).ok_or_else(|| {
            Error::binding(argument.name(), format!("no converter reads {ty} from text"))
        })?;
        converter
            .convert_to(ty, raw.as_bytes())
            .map_err(|e| Error::binding(argument.name(), e.to_string()))
    }
}

/// Default of an optional argument, or a binding failure for a required one.
fn missing(argument: &ArgumentInfo) -> Result<BoundValue> {
    let parameter = argument.parameter();
    if parameter.optional {
        Ok(BoundValue::Json(parameter.default.clone().unwrap_or(JsonValue::Null)))
    } else {
        Err(Error::binding(
            argument.name(),
            format!("a value is required from the {}", argument.source()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Verb;
    use crate::model::{
        ApiModel, ClassInfo, ControllerBuilder, OperationBuilder, Output, ParameterInfo,
        PropertyInfo,
    };
    use crate::services::EchoController;
    use serde_json::json;

    fn model(operation: OperationBuilder) -> Result<ApiModel> {
        ApiModel::builder()
            .class(
                ClassInfo::new("Person")
                    .with_property(PropertyInfo::new("name", TypeInfo::String))
                    .with_property(PropertyInfo::new("age", TypeInfo::Integer)),
            )
            .controller(
                ControllerBuilder::new("PersonController", "/api/person").operation(
                    operation.handler::<EchoController, _>(|_, args| Ok(Output::json(args.to_json()))),
                ),
            )
            .build()
    }

    fn bind(model: &ApiModel, request: &RequestInfo) -> Result<Arguments> {
        let (_, operation) = model.operations().next().ok_or_else(|| Error::construction("empty"))?;
        ArgumentBinder::default().bind(operation, request, model.catalog())
    }

    #[test]
    fn test_url_segment_is_coerced() -> Result<()> {
        let model = model(
            OperationBuilder::new("Result")
                .parameter_from(ParameterInfo::new("input", TypeInfo::Integer), ArgumentSource::UrlSegment),
        )?;
        let args = bind(&model, &RequestInfo::new(Verb::Get, "/api/person/result/42")?)?;
        assert_eq!(args.get::<i64>("input")?, 42);

        let bad = bind(&model, &RequestInfo::new(Verb::Get, "/api/person/result/abc")?);
        assert!(matches!(bad, Err(Error::Binding { .. })));
        Ok(())
    }

    #[test]
    fn test_collections_bind_each_value() -> Result<()> {
        let model = model(
            OperationBuilder::new("List")
                .route("")
                .parameter(ParameterInfo::new("ids", TypeInfo::collection_of(TypeInfo::Integer)).optional()),
        )?;
        let args = bind(&model, &RequestInfo::new(Verb::Get, "/api/person?ids=1&ids=2")?)?;
        assert_eq!(args.value("ids"), Some(&json!([1, 2])));
        Ok(())
    }

    #[test]
    fn test_path_collections_split_on_commas() -> Result<()> {
        let model = model(
            OperationBuilder::new("GetMany")
                .route("many")
                .parameter_from(
                    ParameterInfo::new("ids", TypeInfo::collection_of(TypeInfo::Integer)),
                    ArgumentSource::UrlSegment,
                ),
        )?;
        let args = bind(&model, &RequestInfo::new(Verb::Get, "/api/person/many/1,2,3")?)?;
        assert_eq!(args.value("ids"), Some(&json!([1, 2, 3])));
        Ok(())
    }

    #[test]
    fn test_defaults_and_required_values() -> Result<()> {
        let model = model(
            OperationBuilder::new("List")
                .route("")
                .parameter(ParameterInfo::new("take", TypeInfo::Integer).optional_with(json!(10)))
                .parameter(ParameterInfo::new("name", TypeInfo::String)),
        )?;
        let args = bind(&model, &RequestInfo::new(Verb::Get, "/api/person?name=Ann")?)?;
        assert_eq!(args.get::<i64>("take")?, 10);
        assert_eq!(args.get::<String>("name")?, "Ann");

        let missing = bind(&model, &RequestInfo::new(Verb::Get, "/api/person?take=1")?);
        assert!(matches!(missing, Err(Error::Binding { argument, .. }) if argument == "name"));
        Ok(())
    }

    #[test]
    fn test_body_uses_content_type() -> Result<()> {
        let model = model(
            OperationBuilder::new("Create")
                .parameter(ParameterInfo::new("person", TypeInfo::class("Person"))),
        )?;
        let json = RequestInfo::new(Verb::Post, "/api/person")?
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(r#"{"name":"Ann"}"#);
        assert_eq!(bind(&model, &json)?.value("person"), Some(&json!({"name": "Ann"})));

        let yaml = RequestInfo::new(Verb::Post, "/api/person")?
            .with_header("Content-Type", "application/yaml")
            .with_body("name: Bob\n");
        assert_eq!(bind(&model, &yaml)?.value("person"), Some(&json!({"name": "Bob"})));

        let empty = RequestInfo::new(Verb::Post, "/api/person")?;
        assert!(bind(&model, &empty).is_err());
        Ok(())
    }

    #[test]
    fn test_filter_arguments_are_parsed() -> Result<()> {
        let model = model(
            OperationBuilder::new("List")
                .route("")
                .parameter(ParameterInfo::new("filter", TypeInfo::filter("Person"))),
        )?;
        let request = RequestInfo::new(Verb::Get, "/api/person?filter=age%20gt%2030")?;
        let args = bind(&model, &request)?;
        let filter = args.filter("filter").ok_or_else(|| Error::construction("no filter"))?;
        assert!(filter.evaluate(&json!({"age": 31})));

        let unknown = RequestInfo::new(Verb::Get, "/api/person?filter=height%20gt%2030")?;
        assert!(matches!(bind(&model, &unknown), Err(Error::Binding { .. })));
        Ok(())
    }
}
