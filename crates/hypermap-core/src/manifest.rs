//! Declarative manifest format for composing an [`ApiModel`].
//!
//! A manifest lists the domain classes and the controllers exposing them.
//! It can be written in YAML or JSON and loaded from disk or over http(s).
//! Composition turns it into the same immutable model that typed Rust
//! registrations produce, so dispatch and description do not care where the
//! model came from.
//!
//! # Examples
//!
//! ```
//! use hypermap_core::manifest::{Bindings, Manifest};
//!
//! let manifest = Manifest::parse_content(r#"
//! controllers:
//!   - name: TestController
//!     url: /api/test
//!     operations:
//!       - name: Result
//!         method: GET
//!         parameters:
//!           - { name: input, type: integer, source: url }
//!         returns: integer
//! "#).unwrap();
//!
//! let model = manifest.compose(&Bindings::new()).unwrap();
//! let operation = model.operation("TestController.Result").unwrap();
//! assert_eq!(operation.url_template(), Some("/api/test/result/{input}"));
//! ```

// Internal imports (std, crate)
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::http::Verb;
use crate::model::{
    operation::typed_handler, ApiModel, ArgumentSource, Arguments, ClassInfo, ControllerBuilder,
    Handler, OperationBuilder, Output, ParameterDeclaration, ParameterInfo, ResultDeclaration,
    ResultTarget, TypeInfo,
};
use crate::security::SecurityRequirements;
use crate::services::EchoController;
use crate::{Error, Result};

// External imports (alphabetized)
use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use serde_value::Value as SerdeValue;
use tokio::fs;

/// Root of a manifest document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Whether route matching distinguishes letter case
    #[serde(default)]
    pub case_sensitive_paths: bool,

    /// Domain classes referenced by operations
    #[serde(default)]
    pub classes: Vec<ClassInfo>,

    /// Controllers and their operations
    #[serde(default)]
    pub controllers: Vec<ControllerManifest>,
}

/// One controller: a base path plus its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerManifest {
    pub name: String,

    /// Relative base path, e.g. `/api/person`
    #[serde(alias = "path")]
    pub url: String,

    /// Class this controller manages
    #[serde(default)]
    pub entity: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Claims admitted on every operation, by claim type
    #[serde(default)]
    pub allow: BTreeMap<String, Vec<String>>,

    /// Claims rejected on every operation, by claim type
    #[serde(default)]
    pub deny: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub operations: Vec<OperationManifest>,
}

/// One operation of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationManifest {
    pub name: String,

    /// A single verb or a list of verbs; inferred from the name when empty
    #[serde(default, deserialize_with = "deserialize_verbs")]
    pub method: Vec<Verb>,

    /// Route alias relative to the controller base path
    #[serde(default)]
    pub route: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterManifest>,

    /// Return type; `unit` when omitted
    #[serde(default)]
    pub returns: Option<TypeInfo>,

    /// Named values produced besides the return value
    #[serde(default)]
    pub outputs: Vec<ParameterInfo>,

    /// Outputs written to response headers
    #[serde(default)]
    pub headers: Vec<HeaderManifest>,

    /// Media types advertised instead of the negotiated defaults
    #[serde(default)]
    pub media_types: Vec<String>,

    #[serde(default)]
    pub allow: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub deny: BTreeMap<String, Vec<String>>,
}

/// A parameter and where its value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterManifest {
    pub name: String,

    #[serde(rename = "type")]
    pub ty: TypeInfo,

    /// Inferred from the type and name when omitted
    #[serde(default)]
    pub source: Option<ArgumentSource>,

    #[serde(default)]
    pub optional: bool,

    /// Value used when the request omits the parameter; implies `optional`
    #[serde(default)]
    pub default: Option<JsonValue>,

    /// Explicit template fragment such as `/page/{number}` or `q={query}`
    #[serde(default)]
    pub template: Option<String>,
}

/// A response header filled from an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderManifest {
    /// Header name, e.g. `Location`
    pub name: String,

    /// Output feeding the header
    pub output: String,

    /// URL template the output is expanded through, e.g. `/api/person/{id}`
    #[serde(default)]
    pub template: Option<String>,
}

/// Typed handlers for controllers implemented in Rust.
///
/// Controllers without a binding are served by [`EchoController`].
#[derive(Default)]
pub struct Bindings {
    controllers: HashMap<String, ControllerBinding>,
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.controllers.iter()).finish()
    }
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controller<S: Into<String>>(mut self, name: S, binding: ControllerBinding) -> Self {
        self.controllers.insert(name.into(), binding);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ControllerBinding> {
        self.controllers.get(name)
    }
}

/// Controller type plus one handler per operation name.
pub struct ControllerBinding {
    controller_type: TypeId,
    type_name: &'static str,
    handlers: HashMap<String, (TypeId, Handler)>,
}

impl fmt::Debug for ControllerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerBinding")
            .field("type_name", &self.type_name)
            .field("operations", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ControllerBinding {
    pub fn for_type<C: Any + Send + Sync>() -> Self {
        Self {
            controller_type: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            handlers: HashMap::new(),
        }
    }

    pub fn handler<C, F>(mut self, operation: &str, f: F) -> Self
    where
        C: Any + Send + Sync,
        F: Fn(&C, &Arguments) -> Result<Output> + Send + Sync + 'static,
    {
        self.handlers.insert(
            operation.to_string(),
            (TypeId::of::<C>(), typed_handler::<C, F>(operation, f)),
        );
        self
    }
}

impl Manifest {
    /// Load from an http(s) URL or a local file path
    pub async fn from_file_or_url<P: AsRef<str>>(location: P) -> Result<Self> {
        let location = location.as_ref();
        if location.starts_with("http://") || location.starts_with("https://") {
            return Self::from_url(location).await;
        }
        Self::from_file(location).await
    }

    /// Load from a YAML or JSON file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        Self::parse_content(&content).map_err(|e| {
            Error::manifest(format!("Failed to parse manifest at {}: {}", path.display(), e))
        })
    }

    /// Fetch from a URL
    pub async fn from_url(url: &str) -> Result<Self> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| Error::manifest(format!("Failed to fetch manifest from {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::manifest(format!(
                "Failed to fetch manifest from {url}: HTTP {}",
                response.status()
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| Error::manifest(format!("Failed to read response from {url}: {e}")))?;

        Self::parse_content(&content)
            .map_err(|e| Error::manifest(format!("Failed to parse manifest from {url}: {e}")))
    }

    /// Parse content as JSON, falling back to YAML
    pub fn parse_content(content: &str) -> Result<Self> {
        if let Ok(manifest) = serde_json::from_str(content) {
            return Ok(manifest);
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Compose the model; any invalid declaration fails the whole manifest.
    pub fn compose(&self, bindings: &Bindings) -> Result<ApiModel> {
        self.composer(bindings, false)?.build()
    }

    /// Compose the model, skipping controllers that fail for reasons other
    /// than route or template validation.
    pub fn compose_lenient(&self, bindings: &Bindings) -> Result<ApiModel> {
        self.composer(bindings, true)?.build_lenient()
    }

    fn composer(&self, bindings: &Bindings, lenient: bool) -> Result<crate::model::ApiModelBuilder> {
        let mut builder = ApiModel::builder().case_sensitive(self.case_sensitive_paths);
        for class in &self.classes {
            builder = builder.class(class.clone());
        }
        for controller in &self.controllers {
            match controller_builder(controller, bindings.get(&controller.name)) {
                Ok(controller) => builder = builder.controller(controller),
                Err(e) if lenient && !matches!(e, Error::Construction(_)) => {
                    log::warn!("skipping controller {}: {e}", controller.name);
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "composing {} classes and {} controllers",
            self.classes.len(),
            self.controllers.len()
        );
        Ok(builder)
    }
}

fn controller_builder(
    manifest: &ControllerManifest,
    binding: Option<&ControllerBinding>,
) -> Result<ControllerBuilder> {
    let mut builder = ControllerBuilder::new(manifest.name.as_str(), manifest.url.as_str())
        .security(requirements(&manifest.allow, &manifest.deny));
    if let Some(binding) = binding {
        builder = builder.with_type(binding.controller_type, binding.type_name);
    }
    if let Some(entity) = &manifest.entity {
        builder = builder.entity(entity.as_str());
    }
    if let Some(description) = &manifest.description {
        builder = builder.description(description.as_str());
    }

    for operation in &manifest.operations {
        let mut op = operation_builder(operation);
        match binding {
            Some(binding) => {
                if let Some((handler_type, handler)) = binding.handlers.get(&operation.name) {
                    if *handler_type != binding.controller_type {
                        return Err(Error::manifest(format!(
                            "Handler for '{}.{}' is bound to a different controller type than {}",
                            manifest.name, operation.name, binding.type_name
                        )));
                    }
                    op = op.raw_handler(handler.clone());
                }
            }
            None => op = op.raw_handler(echo_handler(operation)),
        }
        builder = builder.operation(op);
    }
    debug!("declared controller {} from manifest", manifest.name);
    Ok(builder)
}

fn operation_builder(manifest: &OperationManifest) -> OperationBuilder {
    let mut builder = OperationBuilder::new(manifest.name.as_str())
        .returns(manifest.returns.clone().unwrap_or(TypeInfo::Unit))
        .security(requirements(&manifest.allow, &manifest.deny));
    for verb in &manifest.method {
        builder = builder.verb(*verb);
    }
    if let Some(route) = &manifest.route {
        builder = builder.route(route.as_str());
    }
    if let Some(description) = &manifest.description {
        builder = builder.description(description.as_str());
    }
    for parameter in &manifest.parameters {
        let mut info = ParameterInfo::new(parameter.name.as_str(), parameter.ty.clone());
        info = match &parameter.default {
            Some(default) => info.optional_with(default.clone()),
            None if parameter.optional => info.optional(),
            None => info,
        };
        builder = builder.declare(ParameterDeclaration {
            parameter: info,
            source: parameter.source,
            fragment: parameter.template.clone(),
        });
    }
    for output in &manifest.outputs {
        builder = builder.output(output.clone());
    }
    for header in &manifest.headers {
        builder = builder.result(ResultDeclaration {
            output: Some(header.output.clone()),
            target: ResultTarget::Header(header.name.clone()),
            url_template: header.template.clone(),
        });
    }
    for media_type in &manifest.media_types {
        builder = builder.media_type(media_type.as_str());
    }
    builder
}

fn requirements(
    allow: &BTreeMap<String, Vec<String>>,
    deny: &BTreeMap<String, Vec<String>>,
) -> SecurityRequirements {
    let mut requirements = SecurityRequirements::default();
    for (claim_type, values) in allow {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        requirements.allow(claim_type, &values);
    }
    for (claim_type, values) in deny {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        requirements.deny(claim_type, &values);
    }
    requirements
}

/// Handler answering with what was bound: the single argument, or all of
/// them as an object. Named outputs are looked up among the arguments and
/// then among the fields of the single argument.
fn echo_handler(operation: &OperationManifest) -> Handler {
    let returns_unit = matches!(operation.returns, None | Some(TypeInfo::Unit));
    let outputs: Vec<String> = operation.outputs.iter().map(|o| o.name.clone()).collect();
    typed_handler::<EchoController, _>(&operation.name, move |_, arguments: &Arguments| {
        let single = match arguments.len() {
            1 => arguments.iter().next().map(|(name, _)| name.to_string()),
            _ => None,
        };
        let single_value = single.as_deref().and_then(|name| arguments.value(name));

        let mut output = if returns_unit {
            Output::none()
        } else {
            match single_value {
                Some(value) => Output::json(value.clone()),
                None => Output::json(arguments.to_json()),
            }
        };
        for name in &outputs {
            let value = arguments
                .value(name)
                .or_else(|| single_value.and_then(|v| v.get(name)))
                .cloned();
            if let Some(value) = value {
                output = output.with_output(name.as_str(), value);
            }
        }
        Ok(output)
    })
}

/// Accept either a single verb or a list of verbs
fn deserialize_verbs<'de, D>(deserializer: D) -> std::result::Result<Vec<Verb>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = SerdeValue::deserialize(deserializer)?;
    let parse = |s: &str| s.parse::<Verb>().map_err(serde::de::Error::custom);

    match value {
        SerdeValue::String(s) => Ok(vec![parse(&s)?]),
        SerdeValue::Seq(seq) => {
            let mut result = Vec::new();
            for item in seq {
                if let SerdeValue::String(s) = item {
                    result.push(parse(&s)?);
                } else {
                    return Err(serde::de::Error::custom("Expected verb or array of verbs"));
                }
            }
            Ok(result)
        }
        SerdeValue::Unit | SerdeValue::Option(None) => Ok(Vec::new()),
        _ => Err(serde::de::Error::custom("Expected verb or array of verbs")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Identity;
    use serde_json::json;
    use tempfile::tempdir;

    const PEOPLE: &str = r#"
classes:
  - name: Person
    properties:
      - { name: id, type: integer, required: true }
      - { name: name, type: string }
      - { name: friends, type: "[Person]" }
controllers:
  - name: PersonController
    url: /api/person
    entity: Person
    deny:
      role: [guest]
    operations:
      - name: Get
        parameters:
          - { name: id, type: integer }
        returns: Person
      - name: List
        parameters:
          - { name: filter, type: "filter<Person>" }
          - { name: skip, type: integer, default: 0 }
        returns: "[Person]"
      - name: Create
        parameters:
          - { name: person, type: Person }
        outputs:
          - { name: id, type: integer }
        headers:
          - { name: Location, output: id, template: "/api/person/{id}" }
        allow:
          role: [admin]
      - name: Touch
        method: [PUT, PATCH]
        route: touch
        parameters:
          - { name: id, type: integer, source: url }
"#;

    #[test]
    fn test_parse_yaml_and_json() -> Result<()> {
        let manifest = Manifest::parse_content(PEOPLE)?;
        assert_eq!(manifest.classes.len(), 1);
        assert_eq!(manifest.controllers[0].operations[3].method, vec![Verb::Put, Verb::Patch]);

        let json = serde_json::to_string(&manifest)?;
        assert_eq!(Manifest::parse_content(&json)?, manifest);
        Ok(())
    }

    #[test]
    fn test_single_verb_and_bad_verb() {
        let single = Manifest::parse_content(
            "controllers: [{ name: A, url: /a, operations: [{ name: Ping, method: post }] }]",
        );
        let single = single.map(|m| m.controllers[0].operations[0].method.clone());
        assert_eq!(single.ok(), Some(vec![Verb::Post]));

        let bad = Manifest::parse_content(
            "controllers: [{ name: A, url: /a, operations: [{ name: Ping, method: FETCH }] }]",
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_compose_people() -> Result<()> {
        let model = Manifest::parse_content(PEOPLE)?.compose(&Bindings::new())?;

        let get = model.operation("PersonController.Get").ok_or_else(|| Error::manifest("Get"))?;
        assert_eq!(get.verb(), Verb::Get);
        assert_eq!(get.url_template(), Some("/api/person/{id}"));

        let list = model.operation("PersonController.List").ok_or_else(|| Error::manifest("List"))?;
        assert_eq!(list.argument("skip").map(|a| a.source()), Some(ArgumentSource::QueryString));
        assert!(list.matches("/api/person", Some("skip=5")));

        assert!(model.operation("PersonController.Touch.PUT").is_some());
        assert!(model.operation("PersonController.Touch.PATCH").is_some());

        let create = model
            .operation("PersonController.Create")
            .ok_or_else(|| Error::manifest("Create"))?;
        assert_eq!(create.verb(), Verb::Post);
        let admin = Identity::named("root").with_role("admin");
        let guest = Identity::named("visitor").with_role("guest").with_role("admin");
        assert!(create.security().allows(&admin));
        assert!(!create.security().allows(&guest));
        assert!(!create.security().allows(&Identity::named("bob")));
        Ok(())
    }

    #[test]
    fn test_echo_handler_returns_single_argument() -> Result<()> {
        let model = Manifest::parse_content(PEOPLE)?.compose(&Bindings::new())?;
        let create = model
            .operation("PersonController.Create")
            .ok_or_else(|| Error::manifest("Create"))?;
        let arguments = Arguments::new().with("person", json!({ "id": 7, "name": "Ann" }));
        let output = create.method().call(&EchoController, &arguments)?;
        assert_eq!(output.value, None);
        assert_eq!(output.output("id"), Some(&json!(7)));

        let get = model.operation("PersonController.Get").ok_or_else(|| Error::manifest("Get"))?;
        let output = get.method().call(&EchoController, &Arguments::new().with("id", json!(3)))?;
        assert_eq!(output.value, Some(json!(3)));
        Ok(())
    }

    #[test]
    fn test_unknown_class_fails_even_when_lenient() -> Result<()> {
        let manifest = Manifest::parse_content(
            r#"
controllers:
  - name: Broken
    url: /broken
    operations:
      - name: Get
        returns: Ghost
  - name: Fine
    url: /fine
    operations:
      - name: Get
"#,
        )?;
        assert!(manifest.compose(&Bindings::new()).is_err());
        assert!(manifest.compose_lenient(&Bindings::new()).is_err());
        Ok(())
    }

    #[test]
    fn test_lenient_skips_unbound_operations() -> Result<()> {
        struct Greeter;

        let manifest = Manifest::parse_content(
            r#"
controllers:
  - name: Greeter
    url: /greet
    operations:
      - name: Hello
        returns: string
      - name: Wave
  - name: Fine
    url: /fine
    operations:
      - name: Get
"#,
        )?;
        let bindings = Bindings::new().controller(
            "Greeter",
            ControllerBinding::for_type::<Greeter>()
                .handler::<Greeter, _>("Hello", |_, _| Ok(Output::json(json!("hi")))),
        );

        assert!(matches!(manifest.compose(&bindings), Err(Error::Manifest(_))));

        let model = manifest.compose_lenient(&bindings)?;
        assert!(model.controller("Greeter").is_none());
        assert!(model.controller("Fine").is_some());
        Ok(())
    }

    #[test]
    fn test_mismatched_handler_type() -> Result<()> {
        struct Greeter;
        struct Other;

        let manifest = Manifest::parse_content(
            "controllers: [{ name: Greeter, url: /greet, operations: [{ name: Hello }] }]",
        )?;
        let bindings = Bindings::new().controller(
            "Greeter",
            ControllerBinding::for_type::<Greeter>()
                .handler::<Other, _>("Hello", |_, _| Ok(Output::none())),
        );
        assert!(matches!(manifest.compose(&bindings), Err(Error::Manifest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_from_file_or_url_reads_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("api.yaml");
        fs::write(&path, PEOPLE).await?;

        let manifest = Manifest::from_file_or_url(path.to_string_lossy()).await?;
        assert_eq!(manifest.controllers[0].name, "PersonController");

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "controllers: 12").await?;
        let result = Manifest::from_file(&broken).await;
        assert!(matches!(result, Err(Error::Manifest(_))));
        Ok(())
    }
}
