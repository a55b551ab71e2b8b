//! Walks the operation model and renders the description document.

// Internal imports (std, crate)
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::{
    ApiDescription, ClassDescription, IriTemplate, IriTemplateMapping, OperationDescription,
    PropertyDescription, TypeReference,
};
use crate::config::Config;
use crate::conversion::{ConverterProvider, Representation};
use crate::model::{ApiModel, ArgumentSource, ControllerInfo, OperationInfo, TypeInfo};
use crate::template::UrlTemplate;
use crate::utils::sanitize_identifier;
use crate::{Error, Result};

// External imports (alphabetized)
use log::debug;
use once_cell::sync::OnceCell;

/// Builds, and memoizes, the description of one composed model.
#[derive(Debug)]
pub struct DescriptionBuilder {
    model: Arc<ApiModel>,
    converters: Arc<ConverterProvider>,
    config: Config,
    classes: RwLock<HashMap<String, Arc<ClassDescription>>>,
    document: OnceCell<Arc<ApiDescription>>,
}

impl DescriptionBuilder {
    pub fn new(model: Arc<ApiModel>, converters: Arc<ConverterProvider>, config: Config) -> Self {
        Self {
            model,
            converters,
            config,
            classes: RwLock::new(HashMap::new()),
            document: OnceCell::new(),
        }
    }

    /// The full document, built on first use.
    pub fn describe(&self) -> Result<Arc<ApiDescription>> {
        self.document
            .get_or_try_init(|| self.build().map(Arc::new))
            .cloned()
    }

    fn build(&self) -> Result<ApiDescription> {
        let root = self.config.documentation_uri()?.to_string();
        let mut supported: Vec<ClassDescription> = Vec::new();

        for controller in self.model.controllers() {
            let operations = self.describe_operations(&root, controller)?;
            let owner = match controller.entity() {
                Some(entity) => {
                    self.describe_class(&root, entity)?;
                    entity.to_string()
                }
                None => controller.name().to_string(),
            };
            match supported.iter_mut().find(|c| c.label == owner) {
                Some(class) => class.supported_operations.extend(operations),
                None => {
                    let mut class = match self.cached(&owner) {
                        Some(class) => (*class).clone(),
                        None => ClassDescription {
                            id: node_id(&root, &owner),
                            label: owner.clone(),
                            description: controller.description().map(str::to_string),
                            supported_properties: Vec::new(),
                            supported_operations: Vec::new(),
                        },
                    };
                    class.supported_operations.extend(operations);
                    supported.push(class);
                }
            }
        }

        let mut classes: Vec<Arc<ClassDescription>> = self
            .classes
            .read()
            .map_err(|_| Error::construction("description cache is poisoned"))?
            .values()
            .cloned()
            .collect();
        classes.sort_by(|a, b| a.label.cmp(&b.label));
        for class in classes {
            if !supported.iter().any(|c| c.label == class.label) {
                supported.push((*class).clone());
            }
        }

        debug!("described {} classes at {root}", supported.len());
        Ok(ApiDescription {
            id: root,
            supported_classes: supported,
        })
    }

    fn cached(&self, name: &str) -> Option<Arc<ClassDescription>> {
        self.classes.read().ok()?.get(name).cloned()
    }

    /// Describe a catalog class and every class it references, once each.
    pub fn describe_class(&self, root: &str, name: &str) -> Result<Arc<ClassDescription>> {
        if let Some(class) = self.cached(name) {
            return Ok(class);
        }
        let info = self
            .model
            .catalog()
            .get(name)
            .ok_or_else(|| Error::construction(format!("Unknown class '{name}'")))?;
        let description = Arc::new(ClassDescription {
            id: node_id(root, name),
            label: info.name.clone(),
            description: info.description.clone(),
            supported_properties: info
                .properties
                .iter()
                .map(|p| PropertyDescription {
                    id: node_id(root, &format!("{}.{}", info.name, p.name)),
                    label: p.name.clone(),
                    range: type_reference(root, &p.ty),
                    required: p.required,
                    readable: p.readable,
                    writeable: p.writeable,
                    description: p.description.clone(),
                })
                .collect(),
            supported_operations: Vec::new(),
        });
        let description = {
            let mut classes = self
                .classes
                .write()
                .map_err(|_| Error::construction("description cache is poisoned"))?;
            classes.entry(name.to_string()).or_insert(description).clone()
        };
        let referenced: BTreeSet<&str> = info.properties.iter().filter_map(|p| p.ty.class_name()).collect();
        for class in referenced {
            self.describe_class(root, class)?;
        }
        Ok(description)
    }

    fn describe_operations(&self, root: &str, controller: &ControllerInfo) -> Result<Vec<OperationDescription>> {
        let mut described: Vec<OperationDescription> = Vec::new();
        for operation in controller.operations() {
            let label = format!("{}.{}", controller.name(), operation.name());
            if let Some(existing) = described.iter_mut().find(|d| d.label == label) {
                existing.method.push(operation.verb().to_string());
                continue;
            }
            for ty in operation.expects().chain([operation.method().returns()]) {
                if let Some(class) = ty.class_name() {
                    self.describe_class(root, class)?;
                }
            }
            described.push(OperationDescription {
                id: node_id(root, &label),
                method: vec![operation.verb().to_string()],
                description: operation.description().map(str::to_string),
                expects: operation.expects().next().map(|ty| type_reference(root, ty)),
                returns: match operation.method().returns() {
                    TypeInfo::Unit => None,
                    ty => Some(type_reference(root, ty)),
                },
                media_types: self.media_types(operation),
                url: operation.url().to_string(),
                template: self.template(root, &label, operation)?,
                label,
            });
        }
        Ok(described)
    }

    /// Configured override, then the operation's own, then every media type
    /// of the representation its types need.
    pub fn media_types(&self, operation: &OperationInfo) -> Vec<String> {
        if let Some(overridden) = self.config.media_type_overrides.get(operation.id()) {
            return overridden.clone();
        }
        if !operation.media_types().is_empty() {
            return operation.media_types().to_vec();
        }
        let structured = operation
            .expects()
            .chain([operation.method().returns()])
            .chain(operation.method().outputs().iter().map(|o| &o.ty))
            .any(|ty| Representation::of(ty) == Representation::Structured);
        let representation = if structured {
            Representation::Structured
        } else {
            Representation::Scalar
        };
        self.converters.media_types(representation)
    }

    fn template(&self, root: &str, label: &str, operation: &OperationInfo) -> Result<Option<IriTemplate>> {
        let Some(template) = operation.url_template() else {
            return Ok(None);
        };
        let parsed = UrlTemplate::parse(template)?;
        let mappings = parsed
            .variables()
            .into_iter()
            .filter_map(|variable| {
                let argument = operation
                    .arguments()
                    .iter()
                    .find(|a| a.variable_name() == Some(variable.name.as_str()))?;
                Some(IriTemplateMapping {
                    variable: variable.name,
                    property: argument.name().to_string(),
                    range: type_reference(root, &argument.parameter().ty),
                    source: argument.source(),
                    required: argument.source() == ArgumentSource::UrlSegment
                        && !argument.parameter().optional,
                })
            })
            .collect();
        Ok(Some(IriTemplate {
            id: node_id(root, &format!("{label}.template")),
            template: template.to_string(),
            variable_representation: "BasicRepresentation".to_string(),
            mappings,
        }))
    }
}

fn node_id(root: &str, name: &str) -> String {
    format!("{root}#{}", sanitize_identifier(name))
}

/// Built-in ids for scalars, the class node for classes.
fn type_reference(root: &str, ty: &TypeInfo) -> TypeReference {
    let id = match ty.item_type() {
        TypeInfo::Unit => "unit".to_string(),
        TypeInfo::Boolean => "xsd:boolean".to_string(),
        TypeInfo::Integer => "xsd:integer".to_string(),
        TypeInfo::Number => "xsd:decimal".to_string(),
        TypeInfo::String => "xsd:string".to_string(),
        TypeInfo::Class(name) | TypeInfo::Filter(name) => node_id(root, name),
        TypeInfo::Collection(item) => type_reference(root, item).id,
    };
    TypeReference {
        id,
        collection: ty.is_collection(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ClassInfo, ControllerBuilder, OperationBuilder, Output, ParameterInfo, PropertyInfo,
    };
    use crate::services::EchoController;

    fn echo(op: OperationBuilder) -> OperationBuilder {
        op.handler::<EchoController, _>(|_, args| Ok(Output::json(args.to_json())))
    }

    fn builder() -> Result<DescriptionBuilder> {
        let model = ApiModel::builder()
            .class(
                ClassInfo::new("Person")
                    .with_property(PropertyInfo::new("name", TypeInfo::String).required())
                    .with_property(PropertyInfo::new(
                        "friends",
                        TypeInfo::collection_of(TypeInfo::class("Person")),
                    ))
                    .with_property(PropertyInfo::new("address", TypeInfo::class("Address"))),
            )
            .class(ClassInfo::new("Address").with_property(PropertyInfo::new("city", TypeInfo::String)))
            .controller(
                ControllerBuilder::new("PersonController", "/api/person")
                    .entity("Person")
                    .operation(echo(
                        OperationBuilder::new("Get")
                            .parameter(ParameterInfo::new("id", TypeInfo::Integer))
                            .returns(TypeInfo::class("Person")),
                    ))
                    .operation(echo(
                        OperationBuilder::new("Count")
                            .parameter(ParameterInfo::new("name", TypeInfo::String).optional())
                            .returns(TypeInfo::Integer)
                            .verb(crate::http::Verb::Get)
                            .verb(crate::http::Verb::Head),
                    )),
            )
            .build()?;
        Ok(DescriptionBuilder::new(
            Arc::new(model),
            Arc::new(ConverterProvider::default()),
            Config::default(),
        ))
    }

    #[test]
    fn test_structured_and_scalar_media_types() -> Result<()> {
        let description = builder()?.describe()?;
        let get = description
            .operation("PersonController.Get")
            .ok_or_else(|| Error::construction("missing Get"))?;
        assert_eq!(
            get.media_types,
            vec!["application/json", "text/json", "application/yaml", "text/yaml"]
        );
        let count = description
            .operation("PersonController.Count")
            .ok_or_else(|| Error::construction("missing Count"))?;
        assert_eq!(count.media_types, vec!["text/plain"]);
        assert_eq!(count.method, vec!["GET", "HEAD"]);
        Ok(())
    }

    #[test]
    fn test_templated_link_mappings() -> Result<()> {
        let description = builder()?.describe()?;
        let get = description
            .operation("PersonController.Get")
            .ok_or_else(|| Error::construction("missing Get"))?;
        let template = get.template.as_ref().ok_or_else(|| Error::construction("no template"))?;
        assert_eq!(template.template, "/api/person/{id}");
        assert_eq!(template.mappings.len(), 1);
        assert_eq!(template.mappings[0].property, "id");
        assert!(template.mappings[0].required);
        assert_eq!(template.id, "http://localhost/api/documentation#PersonController.Get.template");
        Ok(())
    }

    #[test]
    fn test_recursive_classes_are_described_once() -> Result<()> {
        let description = builder()?.describe()?;
        let labels: Vec<_> = description.supported_classes.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Person", "Address"]);
        let person = description.class("Person").ok_or_else(|| Error::construction("no Person"))?;
        assert_eq!(person.supported_operations.len(), 2);
        let friends = &person.supported_properties[1];
        assert_eq!(friends.range.id, "http://localhost/api/documentation#Person");
        assert!(friends.range.collection);
        Ok(())
    }

    #[test]
    fn test_document_is_memoized() -> Result<()> {
        let builder = builder()?;
        let first = builder.describe()?;
        let second = builder.describe()?;
        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[test]
    fn test_config_override_wins() -> Result<()> {
        let builder = builder()?;
        let mut config = Config::default();
        config
            .media_type_overrides
            .insert("PersonController.Get".into(), vec!["application/yaml".into()]);
        let builder = DescriptionBuilder::new(builder.model.clone(), builder.converters.clone(), config);
        let description = builder.describe()?;
        let get = description
            .operation("PersonController.Get")
            .ok_or_else(|| Error::construction("missing Get"))?;
        assert_eq!(get.media_types, vec!["application/yaml"]);
        Ok(())
    }
}
