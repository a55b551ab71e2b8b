//! Request dispatch: from a request to a controller, an operation and a
//! bound invocation.
//!
//! Matching walks three states. Controllers whose base path is a segment
//! prefix of the request path are selected first; within them the first
//! operation whose matcher accepts the path and whose verb equals the
//! request's wins. A path that matches operations but none with the request's
//! verb is reported as [`Error::MethodNotAllowed`] rather than as a missing
//! route.

// Internal imports (std, crate)
use std::fmt;
use std::sync::Arc;

use crate::binding::ArgumentBinder;
use crate::http::{RequestInfo, Verb};
use crate::model::{ApiModel, Arguments, ControllerInfo, ControllerInstance, OperationInfo, Output};
use crate::services::Activator;
use crate::{Error, Result};

// External imports (alphabetized)
use log::debug;

/// Outcome of matching one request.
#[derive(Debug)]
pub enum MatchState<'a> {
    NoMatch,
    /// Some controller owns the path; `allowed` lists the verbs of operations
    /// matching it.
    ControllerMatched {
        controllers: Vec<&'a Arc<ControllerInfo>>,
        allowed: Vec<Verb>,
    },
    OperationMatched {
        controller: &'a Arc<ControllerInfo>,
        operation: &'a Arc<OperationInfo>,
    },
}

/// Maps requests onto composed operations.
#[derive(Clone)]
pub struct DelegateMapper {
    model: Arc<ApiModel>,
    activator: Arc<dyn Activator>,
    binder: ArgumentBinder,
}

impl fmt::Debug for DelegateMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateMapper")
            .field("controllers", &self.model.controllers().len())
            .field("binder", &self.binder)
            .finish()
    }
}

impl DelegateMapper {
    pub fn new(model: Arc<ApiModel>, activator: Arc<dyn Activator>, binder: ArgumentBinder) -> Self {
        Self {
            model,
            activator,
            binder,
        }
    }

    pub fn model(&self) -> &Arc<ApiModel> {
        &self.model
    }

    /// Run the matching state machine without activating anything.
    pub fn match_request(&self, method: Verb, path: &str, query: Option<&str>) -> MatchState<'_> {
        let case_sensitive = self.model.case_sensitive();
        let controllers: Vec<_> = self
            .model
            .controllers()
            .iter()
            .filter(|c| c.is_prefix_of(path, case_sensitive))
            .collect();
        if controllers.is_empty() {
            return MatchState::NoMatch;
        }

        let mut allowed = Vec::new();
        for controller in controllers.iter().copied() {
            for operation in controller.operations() {
                if !operation.matches(path, query) {
                    continue;
                }
                if operation.verb() == method {
                    return MatchState::OperationMatched {
                        controller,
                        operation,
                    };
                }
                if !allowed.contains(&operation.verb()) {
                    allowed.push(operation.verb());
                }
            }
        }
        MatchState::ControllerMatched {
            controllers,
            allowed,
        }
    }

    /// Resolve the operation serving a verb and path.
    pub fn resolve(
        &self,
        method: Verb,
        path: &str,
        query: Option<&str>,
    ) -> Result<(&Arc<ControllerInfo>, &Arc<OperationInfo>)> {
        match self.match_request(method, path, query) {
            MatchState::OperationMatched {
                controller,
                operation,
            } => {
                debug!("{method} {path} -> {}", operation.id());
                Ok((controller, operation))
            }
            MatchState::ControllerMatched { allowed, .. } if !allowed.is_empty() => {
                debug!("{method} {path}: path matches, verb does not ({allowed:?})");
                Err(Error::MethodNotAllowed {
                    method,
                    path: path.to_string(),
                    allowed,
                })
            }
            _ => {
                debug!("{method} {path}: no route");
                Err(Error::NoMatchingRoute {
                    method,
                    path: path.to_string(),
                })
            }
        }
    }

    /// Resolve a request and activate its controller.
    pub fn map_request(&self, request: &RequestInfo) -> Result<RequestMapping> {
        let path = request.route_path();
        let (controller, operation) = self.resolve(request.method, path, request.query())?;
        let target = self.activator.create_instance(controller)?;
        let method_route = path
            .get(controller.url().len()..)
            .filter(|rest| !rest.is_empty())
            .unwrap_or("/")
            .to_string();
        Ok(RequestMapping {
            target,
            operation: operation.clone(),
            controller: controller.clone(),
            method_route,
            binder: self.binder.clone(),
            model: self.model.clone(),
        })
    }
}

/// A resolved request: the controller instance, the operation, and the
/// capability to bind and invoke it.
#[derive(Clone)]
pub struct RequestMapping {
    target: ControllerInstance,
    operation: Arc<OperationInfo>,
    controller: Arc<ControllerInfo>,
    method_route: String,
    binder: ArgumentBinder,
    model: Arc<ApiModel>,
}

impl fmt::Debug for RequestMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMapping")
            .field("operation", &self.operation.id())
            .field("method_route", &self.method_route)
            .finish()
    }
}

impl RequestMapping {
    pub fn target(&self) -> &ControllerInstance {
        &self.target
    }

    pub fn operation(&self) -> &Arc<OperationInfo> {
        &self.operation
    }

    pub fn controller(&self) -> &Arc<ControllerInfo> {
        &self.controller
    }

    /// Request path relative to the controller's base path.
    pub fn method_route(&self) -> &str {
        &self.method_route
    }

    pub fn bind(&self, request: &RequestInfo) -> Result<Arguments> {
        self.binder.bind(&self.operation, request, self.model.catalog())
    }

    pub fn call(&self, arguments: &Arguments) -> Result<Output> {
        self.operation.method().call(self.target.as_ref(), arguments)
    }

    /// Bind then call.
    pub fn invoke(&self, request: &RequestInfo) -> Result<Output> {
        let arguments = self.bind(request)?;
        self.call(&arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArgumentSource, ControllerBuilder, OperationBuilder, ParameterInfo, TypeInfo};
    use crate::services::{EchoController, ServiceContainer};

    fn mapper() -> Result<DelegateMapper> {
        let echo = |op: OperationBuilder| {
            op.handler::<EchoController, _>(|_, args| Ok(Output::json(args.to_json())))
        };
        let model = ApiModel::builder()
            .controller(
                ControllerBuilder::new("TestController", "/api/test")
                    .operation(echo(OperationBuilder::new("Result").parameter_from(
                        ParameterInfo::new("input", TypeInfo::Integer),
                        ArgumentSource::UrlSegment,
                    )))
                    .operation(echo(OperationBuilder::new("List").route("")))
                    .operation(echo(OperationBuilder::new("Create").route(""))),
            )
            .controller(
                ControllerBuilder::new("TestingController", "/api/testing")
                    .operation(echo(OperationBuilder::new("Get").route(""))),
            )
            .build()?;
        Ok(DelegateMapper::new(
            Arc::new(model),
            Arc::new(ServiceContainer::default()),
            ArgumentBinder::default(),
        ))
    }

    #[test]
    fn test_result_example_binds_input() -> Result<()> {
        let mapper = mapper()?;
        let request = RequestInfo::new(Verb::Get, "/api/test/result/42")?;
        let mapping = mapper.map_request(&request)?;
        assert_eq!(mapping.operation().id(), "TestController.Result");
        assert_eq!(mapping.method_route(), "/result/42");
        let output = mapping.invoke(&request)?;
        assert_eq!(output.value, Some(serde_json::json!({"input": 42})));
        Ok(())
    }

    #[test]
    fn test_verb_selects_operation() -> Result<()> {
        let mapper = mapper()?;
        let (_, list) = mapper.resolve(Verb::Get, "/api/test", None)?;
        assert_eq!(list.id(), "TestController.List");
        let (_, create) = mapper.resolve(Verb::Post, "/api/test", None)?;
        assert_eq!(create.id(), "TestController.Create");
        Ok(())
    }

    #[test]
    fn test_wrong_verb_is_method_not_allowed() -> Result<()> {
        let mapper = mapper()?;
        match mapper.resolve(Verb::Delete, "/api/test", None) {
            Err(Error::MethodNotAllowed { allowed, .. }) => {
                assert_eq!(allowed, vec![Verb::Get, Verb::Post]);
            }
            other => panic!("expected 405, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_paths_are_not_found() -> Result<()> {
        let mapper = mapper()?;
        for path in ["/elsewhere", "/api/test/unknown/1/2", "/api/tes"] {
            assert!(
                matches!(mapper.resolve(Verb::Get, path, None), Err(Error::NoMatchingRoute { .. })),
                "{path}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_prefix_is_segment_aware() -> Result<()> {
        let mapper = mapper()?;
        let (controller, _) = mapper.resolve(Verb::Get, "/api/testing", None)?;
        assert_eq!(controller.name(), "TestingController");
        Ok(())
    }

    #[test]
    fn test_trailing_slash_and_case() -> Result<()> {
        let mapper = mapper()?;
        let request = RequestInfo::new(Verb::Get, "/API/Test/")?;
        let mapping = mapper.map_request(&request)?;
        assert_eq!(mapping.operation().id(), "TestController.List");
        Ok(())
    }
}
