//! Operation metadata: the single description driving both dispatch and
//! API description.

// Internal imports (std, crate)
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::http::Verb;
use crate::model::invocation::{Arguments, Handler, Output};
use crate::model::types::{TypeCatalog, TypeInfo};
use crate::model::value::{ArgumentInfo, ArgumentSource, ResultInfo, ResultTarget};
use crate::security::{SecurableResourceInfo, SecurityRequirements};
use crate::template::{self, ArgumentTemplate, TemplateParameter, UrlMatcher, UrlTemplate};
use crate::utils::to_kebab_case;
use crate::{Error, Result};

// External imports (alphabetized)
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Name prefixes recognised when inferring an operation's verb.
const VERB_PREFIXES: &[(&str, Verb)] = &[
    ("Get", Verb::Get),
    ("List", Verb::Get),
    ("Find", Verb::Get),
    ("Query", Verb::Get),
    ("Create", Verb::Post),
    ("Add", Verb::Post),
    ("Post", Verb::Post),
    ("Update", Verb::Put),
    ("Put", Verb::Put),
    ("Set", Verb::Put),
    ("Patch", Verb::Patch),
    ("Delete", Verb::Delete),
    ("Remove", Verb::Delete),
];

/// A declared parameter or named output of a method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeInfo,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
}

impl ParameterInfo {
    pub fn new<S: Into<String>>(name: S, ty: TypeInfo) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            default: None,
        }
    }

    /// Optional parameter falling back to `default` when absent.
    pub fn optional_with(mut self, default: JsonValue) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The underlying callable: identity, signature and body.
#[derive(Clone)]
pub struct MethodInfo {
    name: String,
    parameters: Vec<ParameterInfo>,
    outputs: Vec<ParameterInfo>,
    returns: TypeInfo,
    handler: Option<Handler>,
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInfo")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("outputs", &self.outputs)
            .field("returns", &self.returns)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl MethodInfo {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            outputs: Vec::new(),
            returns: TypeInfo::Unit,
            handler: None,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterInfo) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_output(mut self, output: ParameterInfo) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterInfo> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn outputs(&self) -> &[ParameterInfo] {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&ParameterInfo> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn returns(&self) -> &TypeInfo {
        &self.returns
    }

    /// Call the body against a controller instance.
    pub fn call(&self, target: &(dyn Any + Send + Sync), arguments: &Arguments) -> Result<Output> {
        match &self.handler {
            Some(handler) => handler(target, arguments),
            None => Err(Error::construction(format!(
                "Operation '{}' has no handler",
                self.name
            ))),
        }
    }
}

/// Split a method name into its inferred verb and the route-bearing remainder.
///
/// `GetByName` -> (`GET`, `ByName`); names without a known prefix map to `GET`.
pub fn infer_verb(name: &str) -> (Verb, &str) {
    for (prefix, verb) in VERB_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with(|c: char| c.is_uppercase()) {
                return (*verb, rest);
            }
        }
    }
    (Verb::Get, name)
}

/// Default source of a parameter without an explicit one.
pub fn infer_source(parameter: &ParameterInfo) -> ArgumentSource {
    match &parameter.ty {
        TypeInfo::Filter(_) => ArgumentSource::QueryString,
        ty if ty.requires_structure() || *ty == TypeInfo::Unit => ArgumentSource::Body,
        ty if ty.is_scalar() && parameter.name.eq_ignore_ascii_case("id") => {
            ArgumentSource::UrlSegment
        }
        _ => ArgumentSource::QueryString,
    }
}

/// Immutable description of one callable operation bound to one verb.
#[derive(Debug)]
pub struct OperationInfo {
    id: String,
    controller: String,
    method: Arc<MethodInfo>,
    verb: Verb,
    url: String,
    url_template: Option<String>,
    matcher: UrlMatcher,
    arguments: Vec<ArgumentInfo>,
    argument_templates: Vec<Option<ArgumentTemplate>>,
    results: Vec<ResultInfo>,
    media_types: Vec<String>,
    description: Option<String>,
    security: SecurableResourceInfo,
}

impl OperationInfo {
    /// Stable identifier, `Controller.Operation` (plus the verb when one
    /// method is exposed under several verbs).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }

    pub fn method(&self) -> &MethodInfo {
        &self.method
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Base relative path, without arguments.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn url_template(&self) -> Option<&str> {
        self.url_template.as_deref()
    }

    pub fn matcher(&self) -> &UrlMatcher {
        &self.matcher
    }

    pub fn arguments(&self) -> &[ArgumentInfo] {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentInfo> {
        self.arguments.iter().find(|a| a.name() == name)
    }

    pub(crate) fn argument_template(&self, index: usize) -> Option<&ArgumentTemplate> {
        self.argument_templates.get(index).and_then(Option::as_ref)
    }

    pub fn results(&self) -> &[ResultInfo] {
        &self.results
    }

    /// Explicit media-type override, empty when none was declared.
    pub fn media_types(&self) -> &[String] {
        &self.media_types
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn security(&self) -> &SecurableResourceInfo {
        &self.security
    }

    /// Types accepted from the body.
    pub fn expects(&self) -> impl Iterator<Item = &TypeInfo> {
        self.arguments
            .iter()
            .filter(|a| a.source() == ArgumentSource::Body)
            .map(|a| &a.parameter().ty)
    }

    /// Whether the path (and query, when templated) is served by this operation.
    pub fn matches(&self, path: &str, query: Option<&str>) -> bool {
        self.matcher.is_match(path, query)
    }

    /// Concrete URL to call this operation with the given argument values.
    pub fn call_url(&self, arguments: &Arguments) -> Result<String> {
        let Some(template) = &self.url_template else {
            return Ok(self.url.clone());
        };
        let values: BTreeMap<String, Vec<String>> = self
            .arguments
            .iter()
            .filter_map(|argument| {
                let variable = argument.variable_name()?;
                let value = arguments.value(argument.name())?;
                Some((variable.to_string(), raw_values(value)))
            })
            .collect();
        Ok(UrlTemplate::parse(template)?.expand(&values))
    }
}

/// Raw string forms of a JSON value as used in URLs and headers.
pub fn raw_values(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::String(s) => vec![s.clone()],
        JsonValue::Array(items) => items.iter().flat_map(raw_values).collect(),
        other => vec![other.to_string()],
    }
}

/// Wrap a typed body into a [`Handler`] that downcasts the controller.
pub fn typed_handler<C, F>(operation: &str, f: F) -> Handler
where
    C: Any + Send + Sync,
    F: Fn(&C, &Arguments) -> Result<Output> + Send + Sync + 'static,
{
    let operation = operation.to_string();
    Arc::new(move |target: &(dyn Any + Send + Sync), arguments: &Arguments| {
        let controller = target.downcast_ref::<C>().ok_or_else(|| {
            Error::construction(format!(
                "Operation '{operation}' expects a {} controller",
                std::any::type_name::<C>()
            ))
        })?;
        f(controller, arguments)
    })
}

/// Parameter with its declared source and optional template fragment.
#[derive(Clone, Debug)]
pub struct ParameterDeclaration {
    pub parameter: ParameterInfo,
    pub source: Option<ArgumentSource>,
    pub fragment: Option<String>,
}

/// Declared result: which value, where it goes, optional URL template.
#[derive(Clone, Debug)]
pub struct ResultDeclaration {
    pub output: Option<String>,
    pub target: ResultTarget,
    pub url_template: Option<String>,
}

/// Context an operation is composed in.
pub(crate) struct OperationContext<'a> {
    pub controller: &'a str,
    pub base_path: &'a str,
    pub owner: &'a Arc<SecurableResourceInfo>,
    pub catalog: &'a TypeCatalog,
    pub case_sensitive: bool,
}

/// Declarative builder producing one [`OperationInfo`] per verb.
#[derive(Clone)]
pub struct OperationBuilder {
    name: String,
    verbs: Vec<Verb>,
    route: Option<String>,
    parameters: Vec<ParameterDeclaration>,
    outputs: Vec<ParameterInfo>,
    returns: TypeInfo,
    results: Vec<ResultDeclaration>,
    media_types: Vec<String>,
    description: Option<String>,
    security: SecurityRequirements,
    handler: Option<Handler>,
}

impl OperationBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            verbs: Vec::new(),
            route: None,
            parameters: Vec::new(),
            outputs: Vec::new(),
            returns: TypeInfo::Unit,
            results: Vec::new(),
            media_types: Vec::new(),
            description: None,
            security: SecurityRequirements::default(),
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a verb; without any the verb is inferred from the name.
    pub fn verb(mut self, verb: Verb) -> Self {
        if !self.verbs.contains(&verb) {
            self.verbs.push(verb);
        }
        self
    }

    /// Route alias relative to the controller; `""` serves the base path.
    pub fn route<S: Into<String>>(mut self, route: S) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Parameter with an inferred source.
    pub fn parameter(self, parameter: ParameterInfo) -> Self {
        self.declare(ParameterDeclaration {
            parameter,
            source: None,
            fragment: None,
        })
    }

    pub fn parameter_from(self, parameter: ParameterInfo, source: ArgumentSource) -> Self {
        self.declare(ParameterDeclaration {
            parameter,
            source: Some(source),
            fragment: None,
        })
    }

    pub fn declare(mut self, declaration: ParameterDeclaration) -> Self {
        self.parameters.push(declaration);
        self
    }

    pub fn returns(mut self, ty: TypeInfo) -> Self {
        self.returns = ty;
        self
    }

    pub fn output(mut self, output: ParameterInfo) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn result(mut self, result: ResultDeclaration) -> Self {
        self.results.push(result);
        self
    }

    /// Write a named output into a header, optionally expanded through a
    /// URL template such as `/api/person/{id}`.
    pub fn header_result<H: Into<String>>(
        self,
        output: &str,
        header: H,
        url_template: Option<&str>,
    ) -> Self {
        self.result(ResultDeclaration {
            output: Some(output.to_string()),
            target: ResultTarget::Header(header.into()),
            url_template: url_template.map(str::to_string),
        })
    }

    pub fn media_type<S: Into<String>>(mut self, media_type: S) -> Self {
        self.media_types.push(media_type.into());
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn allow(mut self, claim_type: &str, values: &[&str]) -> Self {
        self.security.allow(claim_type, values);
        self
    }

    pub fn deny(mut self, claim_type: &str, values: &[&str]) -> Self {
        self.security.deny(claim_type, values);
        self
    }

    pub fn security(mut self, security: SecurityRequirements) -> Self {
        self.security = security;
        self
    }

    /// Typed body: `f` receives the activated controller.
    pub fn handler<C, F>(mut self, f: F) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(&C, &Arguments) -> Result<Output> + Send + Sync + 'static,
    {
        self.handler = Some(typed_handler::<C, F>(&self.name, f));
        self
    }

    pub fn raw_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn build(self, context: &OperationContext<'_>) -> Result<Vec<OperationInfo>> {
        if self.name.trim().is_empty() {
            return Err(Error::construction(format!(
                "Operation of '{}' has no name",
                context.controller
            )));
        }
        let (inferred_verb, remainder) = infer_verb(&self.name);
        let verbs = if self.verbs.is_empty() {
            vec![inferred_verb]
        } else {
            self.verbs.clone()
        };
        let route = self.route.clone().unwrap_or_else(|| to_kebab_case(remainder));
        let url = match template::normalize_path(&format!("{}/{route}", context.base_path)) {
            path if path.is_empty() => "/".to_string(),
            path => path,
        };

        let mut seen = HashSet::new();
        for parameter in self.parameters.iter().map(|d| &d.parameter).chain(&self.outputs) {
            if !seen.insert(parameter.name.as_str()) {
                return Err(Error::construction(format!(
                    "'{}' is declared twice on operation '{}'",
                    parameter.name, self.name
                )));
            }
            context.catalog.validate(&parameter.ty)?;
        }
        context.catalog.validate(&self.returns)?;

        let method = Arc::new(MethodInfo {
            name: self.name.clone(),
            parameters: self.parameters.iter().map(|d| d.parameter.clone()).collect(),
            outputs: self.outputs.clone(),
            returns: self.returns.clone(),
            handler: self.handler.clone(),
        });

        let sources: Vec<ArgumentSource> = self
            .parameters
            .iter()
            .map(|d| d.source.unwrap_or_else(|| infer_source(&d.parameter)))
            .collect();
        for (declaration, source) in self.parameters.iter().zip(&sources) {
            if matches!(declaration.parameter.ty, TypeInfo::Filter(_))
                && *source != ArgumentSource::QueryString
            {
                return Err(Error::construction(format!(
                    "Filter '{}' must be read from the query string",
                    declaration.parameter.name
                )));
            }
        }
        if sources.iter().filter(|s| **s == ArgumentSource::Body).count() > 1 {
            return Err(Error::construction(format!(
                "Operation '{}' reads more than one argument from the body",
                self.name
            )));
        }
        let template_parameters: Vec<TemplateParameter<'_>> = self
            .parameters
            .iter()
            .zip(&sources)
            .map(|(d, source)| TemplateParameter {
                name: &d.parameter.name,
                source: *source,
                is_collection: d.parameter.ty.is_collection(),
                optional: d.parameter.optional,
                fragment: d.fragment.as_deref(),
            })
            .collect();
        let compiled = template::compile(&url, &template_parameters, context.case_sensitive)?;

        let arguments = self
            .parameters
            .iter()
            .zip(&sources)
            .zip(&compiled.arguments)
            .map(|((declaration, source), sub)| {
                ArgumentInfo::new(
                    &method,
                    declaration.parameter.clone(),
                    *source,
                    sub.as_ref().map(|s| s.url_template.clone()),
                    sub.as_ref().map(|s| s.variable_name.clone()),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut declared_results = self.results.clone();
        if !declared_results.iter().any(|r| r.output.is_none()) && self.returns != TypeInfo::Unit {
            declared_results.insert(
                0,
                ResultDeclaration {
                    output: None,
                    target: ResultTarget::Body,
                    url_template: None,
                },
            );
        }
        let results = declared_results
            .into_iter()
            .map(|declaration| {
                let variable = match &declaration.url_template {
                    Some(t) => UrlTemplate::parse(t)?.variables().into_iter().next().map(|v| v.name),
                    None => None,
                };
                ResultInfo::new(
                    &method,
                    declaration.output.as_deref(),
                    declaration.target,
                    declaration.url_template,
                    variable,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let multiple = verbs.len() > 1;
        let operations = verbs
            .into_iter()
            .map(|verb| {
                let id = if multiple {
                    format!("{}.{}.{}", context.controller, self.name, verb)
                } else {
                    format!("{}.{}", context.controller, self.name)
                };
                debug!(
                    "composed {id}: {verb} {} matcher {}",
                    compiled.template.as_deref().unwrap_or(&url),
                    compiled.matcher.as_str()
                );
                OperationInfo {
                    id,
                    controller: context.controller.to_string(),
                    method: method.clone(),
                    verb,
                    url: url.clone(),
                    url_template: compiled.template.clone(),
                    matcher: compiled.matcher.clone(),
                    arguments: arguments.clone(),
                    argument_templates: compiled.arguments.clone(),
                    results: results.clone(),
                    media_types: self.media_types.clone(),
                    description: self.description.clone(),
                    security: SecurableResourceInfo::new(self.security.clone())
                        .owned_by(context.owner.clone()),
                }
            })
            .collect();
        Ok(operations)
    }
}
