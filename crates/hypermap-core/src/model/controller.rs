//! Controllers and the composed API model.

// Internal imports (std, crate)
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use crate::model::operation::{OperationBuilder, OperationContext, OperationInfo};
use crate::model::types::{ClassInfo, TypeCatalog, TypeInfo};
use crate::security::{SecurableResourceInfo, SecurityRequirements};
use crate::services::EchoController;
use crate::template::normalize_path;
use crate::{Error, Result};

// External imports (alphabetized)
use log::{debug, warn};
use url::Url;

/// A controller: base path, owning type and its operations.
#[derive(Debug)]
pub struct ControllerInfo {
    name: String,
    url: String,
    controller_type: TypeId,
    type_name: &'static str,
    entity: Option<String>,
    description: Option<String>,
    operations: Vec<Arc<OperationInfo>>,
    security: Arc<SecurableResourceInfo>,
}

impl ControllerInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized relative base path; the root controller has `""`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn controller_type(&self) -> TypeId {
        self.controller_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Class of the entity this controller exposes, if any.
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn operations(&self) -> &[Arc<OperationInfo>] {
        &self.operations
    }

    pub fn operation(&self, id: &str) -> Option<&Arc<OperationInfo>> {
        self.operations.iter().find(|o| o.id() == id)
    }

    pub fn security(&self) -> &Arc<SecurableResourceInfo> {
        &self.security
    }

    /// Segment-aware, case-insensitive unless told otherwise.
    pub fn is_prefix_of(&self, path: &str, case_sensitive: bool) -> bool {
        if self.url.is_empty() {
            return true;
        }
        let Some(head) = path.get(..self.url.len()) else {
            return false;
        };
        let same = if case_sensitive {
            head == self.url
        } else {
            head.eq_ignore_ascii_case(&self.url)
        };
        same && matches!(path.as_bytes().get(self.url.len()), None | Some(b'/'))
    }
}

/// Reject anything that is not a relative path.
fn relative_path(url: &str) -> Result<String> {
    let trimmed = url.trim();
    if Url::parse(trimmed).is_ok() || trimmed.starts_with("//") {
        return Err(Error::construction(format!(
            "Controller path '{url}' must be relative"
        )));
    }
    if trimmed.contains(['?', '#', '{', '}']) {
        return Err(Error::construction(format!(
            "Controller path '{url}' must be a plain path"
        )));
    }
    Ok(normalize_path(trimmed))
}

/// Declarative builder for a [`ControllerInfo`].
#[derive(Clone)]
pub struct ControllerBuilder {
    name: String,
    url: String,
    controller_type: TypeId,
    type_name: &'static str,
    entity: Option<String>,
    description: Option<String>,
    security: SecurityRequirements,
    operations: Vec<OperationBuilder>,
}

impl ControllerBuilder {
    /// Controller served by the built-in echo controller.
    pub fn new<N: Into<String>, U: Into<String>>(name: N, url: U) -> Self {
        Self::for_type::<EchoController, _, _>(name, url)
    }

    /// Controller whose operations run against instances of `C`.
    pub fn for_type<C: Any, N: Into<String>, U: Into<String>>(name: N, url: U) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            controller_type: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            entity: None,
            description: None,
            security: SecurityRequirements::default(),
            operations: Vec::new(),
        }
    }

    pub(crate) fn with_type(mut self, controller_type: TypeId, type_name: &'static str) -> Self {
        self.controller_type = controller_type;
        self.type_name = type_name;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity<S: Into<String>>(mut self, class: S) -> Self {
        self.entity = Some(class.into());
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

    pub fn operation(mut self, operation: OperationBuilder) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn build(self, catalog: &TypeCatalog, case_sensitive: bool) -> Result<ControllerInfo> {
        let url = relative_path(&self.url)?;
        if let Some(entity) = &self.entity {
            catalog.validate(&TypeInfo::class(entity.as_str()))?;
        }
        let security = Arc::new(SecurableResourceInfo::new(self.security));
        let context = OperationContext {
            controller: &self.name,
            base_path: &url,
            owner: &security,
            catalog,
            case_sensitive,
        };

        let mut operations = Vec::new();
        let mut ids = HashSet::new();
        for builder in self.operations {
            if !builder.has_handler() {
                return Err(Error::manifest(format!(
                    "Operation '{}.{}' has no handler",
                    self.name,
                    builder.name()
                )));
            }
            for operation in builder.build(&context)? {
                if !ids.insert(operation.id().to_string()) {
                    return Err(Error::construction(format!(
                        "Operation '{}' is declared twice",
                        operation.id()
                    )));
                }
                operations.push(Arc::new(operation));
            }
        }
        debug!("composed controller {} at '{url}' with {} operations", self.name, operations.len());

        Ok(ControllerInfo {
            name: self.name,
            url,
            controller_type: self.controller_type,
            type_name: self.type_name,
            entity: self.entity,
            description: self.description,
            operations,
            security,
        })
    }
}

/// Every composed controller plus the class catalog they reference.
#[derive(Debug, Default)]
pub struct ApiModel {
    catalog: TypeCatalog,
    controllers: Vec<Arc<ControllerInfo>>,
    case_sensitive: bool,
}

impl ApiModel {
    pub fn builder() -> ApiModelBuilder {
        ApiModelBuilder::default()
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn controllers(&self) -> &[Arc<ControllerInfo>] {
        &self.controllers
    }

    pub fn controller(&self, name: &str) -> Option<&Arc<ControllerInfo>> {
        self.controllers.iter().find(|c| c.name() == name)
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Every operation with its owning controller, in registration order.
    pub fn operations(&self) -> impl Iterator<Item = (&Arc<ControllerInfo>, &Arc<OperationInfo>)> {
        self.controllers
            .iter()
            .flat_map(|c| c.operations().iter().map(move |o| (c, o)))
    }

    pub fn operation(&self, id: &str) -> Option<&Arc<OperationInfo>> {
        self.operations().map(|(_, o)| o).find(|o| o.id() == id)
    }
}

/// Collects classes and controllers, then validates them together.
#[derive(Default)]
pub struct ApiModelBuilder {
    classes: Vec<ClassInfo>,
    controllers: Vec<ControllerBuilder>,
    case_sensitive: bool,
}

impl ApiModelBuilder {
    pub fn class(mut self, class: ClassInfo) -> Self {
        self.classes.push(class);
        self
    }

    pub fn controller(mut self, controller: ControllerBuilder) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Fail on the first invalid class or controller.
    pub fn build(self) -> Result<ApiModel> {
        self.compose(false)
    }

    /// Skip controllers that fail for reasons other than route or template
    /// validation, logging each one.
    pub fn build_lenient(self) -> Result<ApiModel> {
        self.compose(true)
    }

    fn compose(self, lenient: bool) -> Result<ApiModel> {
        let mut catalog = TypeCatalog::new();
        for class in self.classes {
            catalog.register(class)?;
        }
        catalog.validate_all()?;

        let mut controllers: Vec<Arc<ControllerInfo>> = Vec::new();
        for builder in self.controllers {
            let name = builder.name().to_string();
            if controllers.iter().any(|c| c.name() == name) {
                return Err(Error::construction(format!(
                    "Controller '{name}' is registered twice"
                )));
            }
            match builder.build(&catalog, self.case_sensitive) {
                Ok(controller) => controllers.push(Arc::new(controller)),
                Err(e @ Error::Construction(_)) => return Err(e),
                Err(e) if lenient => warn!("skipping controller {name}: {e}"),
                Err(e) => return Err(e),
            }
        }

        Ok(ApiModel {
            catalog,
            controllers,
            case_sensitive: self.case_sensitive,
        })
    }
}
