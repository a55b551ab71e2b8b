//! Hypermap Core Library
//!
//! One declarative operation model drives both request dispatch (match a
//! verb and URL, bind arguments, enforce security, invoke, negotiate the
//! response) and the hypermedia description of the exposed API.

pub mod binding;
pub mod config;
pub mod conversion;
pub mod description;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod security;
pub mod services;
pub mod template;
pub mod utils;

pub use crate::{
    binding::{ArgumentBinder, FilterExpression},
    config::Config,
    conversion::{CompatibilityLevel, Converter, ConverterProvider},
    description::{ApiDescription, DescriptionBuilder},
    dispatch::{DelegateMapper, RequestMapping},
    error::{Error, Result},
    http::{RequestInfo, ResponseInfo, Verb},
    manifest::{Bindings, ControllerBinding, Manifest},
    model::{ApiModel, ControllerBuilder, OperationBuilder},
    pipeline::RequestHandler,
    security::{Identity, SecurableResourceInfo, SecurityRequirements},
    services::{EchoController, ServiceContainer},
};
