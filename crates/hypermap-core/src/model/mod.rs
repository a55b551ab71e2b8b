//! The operation model shared by dispatch and description.
//!
//! Everything here is composed once from builders (or a manifest) and is
//! read-only afterwards, so it can be shared across concurrent requests.
//!
//! # Examples
//!
//! ```
//! use hypermap_core::model::{
//!     ApiModel, ArgumentSource, ControllerBuilder, OperationBuilder, Output, ParameterInfo,
//!     TypeInfo,
//! };
//! use hypermap_core::services::EchoController;
//!
//! let model = ApiModel::builder()
//!     .controller(
//!         ControllerBuilder::new("TestController", "/api/test").operation(
//!             OperationBuilder::new("Result")
//!                 .parameter_from(ParameterInfo::new("input", TypeInfo::Integer), ArgumentSource::UrlSegment)
//!                 .returns(TypeInfo::Integer)
//!                 .handler::<EchoController, _>(|_, args| Ok(Output::json(args.to_json()))),
//!         ),
//!     )
//!     .build()?;
//! let operation = model.operation("TestController.Result").expect("composed");
//! assert_eq!(operation.url_template(), Some("/api/test/result/{input}"));
//! # Ok::<(), hypermap_core::Error>(())
//! ```

pub mod controller;
pub mod invocation;
pub mod operation;
pub mod types;
pub mod value;

pub use controller::{ApiModel, ApiModelBuilder, ControllerBuilder, ControllerInfo};
pub use invocation::{Arguments, BoundValue, ControllerInstance, Handler, Output};
pub use operation::{
    infer_source, infer_verb, MethodInfo, OperationBuilder, OperationInfo, ParameterDeclaration,
    ParameterInfo, ResultDeclaration,
};
pub use types::{ClassInfo, PropertyInfo, TypeCatalog, TypeInfo};
pub use value::{ArgumentInfo, ArgumentSource, ResultInfo, ResultTarget, ValueInfo};
