//! The request pipeline.
//!
//! [`RequestHandler::handle`] takes a [`RequestInfo`] through dispatch, the
//! security gate, argument binding, invocation, result targets and output
//! negotiation, and always answers with a [`ResponseInfo`]: every [`Error`]
//! is mapped onto its protocol status. Requests to the configured
//! documentation path are answered with the API description instead.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use hypermap_core::http::{RequestInfo, Verb};
//! use hypermap_core::model::{
//!     ApiModel, ArgumentSource, ControllerBuilder, OperationBuilder, Output, ParameterInfo,
//!     TypeInfo,
//! };
//! use hypermap_core::pipeline::RequestHandler;
//! use hypermap_core::services::{EchoController, ServiceContainer};
//! use hypermap_core::Config;
//!
//! let model = ApiModel::builder()
//!     .controller(
//!         ControllerBuilder::new("TestController", "/api/test").operation(
//!             OperationBuilder::new("Result")
//!                 .parameter_from(ParameterInfo::new("input", TypeInfo::Integer), ArgumentSource::UrlSegment)
//!                 .returns(TypeInfo::Integer)
//!                 .handler::<EchoController, _>(|_, args| Ok(Output::json(args.value("input").cloned().unwrap_or_default()))),
//!         ),
//!     )
//!     .build()?;
//! let handler = RequestHandler::new(Arc::new(model), &ServiceContainer::default(), Config::default())?;
//!
//! let response = handler.handle(&RequestInfo::new(Verb::Get, "/api/test/result/42")?);
//! assert_eq!(response.status, 200);
//! assert_eq!(response.body_text(), "42");
//! # Ok::<(), hypermap_core::Error>(())
//! ```

// Internal imports (std, crate)
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::binding::ArgumentBinder;
use crate::config::Config;
use crate::conversion::ConverterProvider;
use crate::description::{ApiDescription, DescriptionBuilder};
use crate::dispatch::DelegateMapper;
use crate::http::{RequestInfo, ResponseInfo, Verb};
use crate::model::operation::raw_values;
use crate::model::{ApiModel, Arguments, OperationInfo, Output, ResultTarget, TypeInfo};
use crate::services::{self, Activator, Resolver};
use crate::template::UrlTemplate;
use crate::{Error, Result};

// External imports (alphabetized)
use log::{debug, error};
use serde_json::Value as JsonValue;

/// Serves requests against one composed model.
#[derive(Debug)]
pub struct RequestHandler {
    mapper: DelegateMapper,
    converters: Arc<ConverterProvider>,
    description: DescriptionBuilder,
    config: Config,
}

impl RequestHandler {
    /// Compose the pipeline. A [`ConverterProvider`] registered in the
    /// container replaces the default one.
    pub fn new<C>(model: Arc<ApiModel>, container: &C, config: Config) -> Result<Self>
    where
        C: Resolver + Activator + Clone + 'static,
    {
        config.validate()?;
        if config.case_sensitive_paths != model.case_sensitive() {
            return Err(Error::config(format!(
                "case_sensitive_paths is {} but the model was composed with case sensitivity {}",
                config.case_sensitive_paths,
                model.case_sensitive()
            )));
        }
        let converters = if container.can_resolve(std::any::TypeId::of::<ConverterProvider>()) {
            services::resolve::<ConverterProvider>(container)?
        } else {
            Arc::new(ConverterProvider::default())
        };
        let activator: Arc<dyn Activator> = Arc::new(container.clone());
        let binder = ArgumentBinder::new(converters.clone());
        Ok(Self {
            mapper: DelegateMapper::new(model.clone(), activator, binder),
            description: DescriptionBuilder::new(model, converters.clone(), config.clone()),
            converters,
            config,
        })
    }

    pub fn mapper(&self) -> &DelegateMapper {
        &self.mapper
    }

    pub fn describe(&self) -> Result<Arc<ApiDescription>> {
        self.description.describe()
    }

    /// Answer a request; failures become status responses.
    pub fn handle(&self, request: &RequestInfo) -> ResponseInfo {
        match self.try_handle(request) {
            Ok(response) => response,
            Err(e) => error_response(request, e),
        }
    }

    pub fn try_handle(&self, request: &RequestInfo) -> Result<ResponseInfo> {
        if self.is_documentation(request) {
            return self.documentation(request);
        }

        let mapping = self.mapper.map_request(request)?;
        let operation = mapping.operation();
        operation
            .security()
            .authorize(&request.identity, operation.id())?;
        let arguments = mapping.bind(request)?;
        let output = mapping.call(&arguments)?;
        self.respond(request, operation, &arguments, output)
    }

    fn is_documentation(&self, request: &RequestInfo) -> bool {
        let route = self.config.documentation_route();
        let path = request.route_path();
        let same = if self.config.case_sensitive_paths {
            path == route
        } else {
            path.eq_ignore_ascii_case(&route)
        };
        same && matches!(request.method, Verb::Get | Verb::Head)
    }

    fn documentation(&self, request: &RequestInfo) -> Result<ResponseInfo> {
        let description = self.description.describe()?;
        let value = serde_json::to_value(description.as_ref())?;
        self.write_body(request, &TypeInfo::class("ApiDocumentation"), &value, ResponseInfo::new(200))
    }

    fn respond(
        &self,
        request: &RequestInfo,
        operation: &OperationInfo,
        arguments: &Arguments,
        output: Output,
    ) -> Result<ResponseInfo> {
        let mut response = ResponseInfo::new(200);
        let mut body: Option<(TypeInfo, JsonValue)> = None;

        for result in operation.results() {
            let (ty, value) = match result.output() {
                Some(name) => match (operation.method().output(name), output.output(name)) {
                    (Some(parameter), Some(value)) => (parameter.ty.clone(), value.clone()),
                    _ => continue,
                },
                None => match &output.value {
                    Some(value) => (operation.method().returns().clone(), value.clone()),
                    None => continue,
                },
            };
            match result.target() {
                ResultTarget::Body => body = Some((ty, value)),
                ResultTarget::Header(name) => {
                    let header = match (result.url_template(), result.variable_name()) {
                        (Some(template), Some(variable)) => {
                            let mut values = template_values(operation, arguments);
                            values.insert(variable.to_string(), raw_values(&value));
                            UrlTemplate::parse(template)?.expand(&values)
                        }
                        _ => raw_values(&value).join(","),
                    };
                    response = response.with_header(name, header);
                }
            }
        }

        match body {
            Some((_, JsonValue::Null)) | None => {
                response.status = if response.headers.contains("location") { 201 } else { 204 };
                Ok(response)
            }
            Some((ty, value)) => {
                if request.method == Verb::Post && response.headers.contains("location") {
                    response.status = 201;
                }
                self.write_body(request, &ty, &value, response)
            }
        }
    }

    /// Negotiate the output converter and serialize `value` into the body.
    fn write_body(
        &self,
        request: &RequestInfo,
        ty: &TypeInfo,
        value: &JsonValue,
        response: ResponseInfo,
    ) -> Result<ResponseInfo> {
        let mut accept = request.accept();
        if request.headers.get("accept").is_none() {
            accept = vec![self.config.default_media_type.clone(), "*/*".to_string()];
        }
        let (converter, media_type) = self
            .converters
            .find_output(ty, &accept)
            .ok_or_else(|| Error::NotAcceptable(accept.join(", ")))?;
        let bytes = converter.convert_from(ty, value)?;
        debug!("writing {ty} as {media_type} with {}", converter.name());
        let response = response.with_header("content-type", media_type);
        if request.method == Verb::Head {
            return Ok(response);
        }
        Ok(response.with_body(bytes))
    }
}

/// Current argument values keyed by template variable.
fn template_values(operation: &OperationInfo, arguments: &Arguments) -> BTreeMap<String, Vec<String>> {
    operation
        .arguments()
        .iter()
        .filter_map(|argument| {
            let variable = argument.variable_name()?;
            let value = arguments.value(argument.name())?;
            Some((variable.to_string(), raw_values(value)))
        })
        .collect()
}

fn error_response(request: &RequestInfo, e: Error) -> ResponseInfo {
    let status = e.status_code();
    if status >= 500 {
        error!("{} {} failed: {e}", request.method, request.path());
    } else {
        debug!("{} {} -> {status}: {e}", request.method, request.path());
    }
    let mut response = ResponseInfo::new(status)
        .with_header("content-type", "text/plain")
        .with_body(e.to_string());
    if let Error::MethodNotAllowed { allowed, .. } = &e {
        let allowed: Vec<&str> = allowed.iter().map(Verb::as_str).collect();
        response = response.with_header("allow", allowed.join(", "));
    }
    response
}
