//! Argument and result descriptors of an operation.

// Internal imports (std, crate)
use std::fmt;

use crate::model::operation::{MethodInfo, ParameterInfo};
use crate::{Error, Result};

// External imports (alphabetized)
use serde::{Deserialize, Serialize};

/// Where an argument value is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentSource {
    Body,
    #[serde(alias = "path", alias = "url")]
    UrlSegment,
    #[serde(alias = "query")]
    QueryString,
}

impl fmt::Display for ArgumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Body => "body",
            Self::UrlSegment => "urlsegment",
            Self::QueryString => "querystring",
        })
    }
}

/// Where a result value is written to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultTarget {
    Body,
    Header(String),
}

/// A method parameter (or the return value when `parameter` is `None`)
/// with its optional URL sub-template and variable name.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueInfo {
    parameter: Option<ParameterInfo>,
    url_template: Option<String>,
    variable_name: Option<String>,
}

impl ValueInfo {
    /// Template and variable name are co-required, and the template must
    /// reference the variable.
    pub fn new(
        parameter: Option<ParameterInfo>,
        url_template: Option<String>,
        variable_name: Option<String>,
    ) -> Result<Self> {
        let subject = parameter
            .as_ref()
            .map_or_else(|| "return value".to_string(), |p| format!("'{}'", p.name));
        match (&url_template, &variable_name) {
            (Some(_), None) => {
                return Err(Error::construction(format!(
                    "{subject}: a URL template requires a variable name"
                )))
            }
            (None, Some(_)) => {
                return Err(Error::construction(format!(
                    "{subject}: a variable name requires a URL template"
                )))
            }
            (Some(template), Some(variable)) => {
                if template.is_empty() || variable.is_empty() {
                    return Err(Error::construction(format!(
                        "{subject}: URL template and variable name must not be empty"
                    )));
                }
                if !references_variable(template, variable) {
                    return Err(Error::construction(format!(
                        "{subject}: template '{template}' does not reference '{variable}'"
                    )));
                }
            }
            (None, None) => {}
        }
        Ok(Self {
            parameter,
            url_template,
            variable_name,
        })
    }

    pub fn parameter(&self) -> Option<&ParameterInfo> {
        self.parameter.as_ref()
    }

    pub fn url_template(&self) -> Option<&str> {
        self.url_template.as_deref()
    }

    pub fn variable_name(&self) -> Option<&str> {
        self.variable_name.as_deref()
    }
}

fn references_variable(template: &str, variable: &str) -> bool {
    [
        format!("{{{variable}}}"),
        format!("{{?{variable}*}}"),
        format!("{{&{variable}*}}"),
    ]
    .iter()
    .any(|expression| template.contains(expression.as_str()))
}

/// A bound operation argument.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgumentInfo {
    parameter: ParameterInfo,
    value: ValueInfo,
    source: ArgumentSource,
}

impl ArgumentInfo {
    /// The parameter must be one of the declaring method's parameters.
    pub fn new(
        method: &MethodInfo,
        parameter: ParameterInfo,
        source: ArgumentSource,
        url_template: Option<String>,
        variable_name: Option<String>,
    ) -> Result<Self> {
        if method.parameter(&parameter.name) != Some(&parameter) {
            return Err(Error::construction(format!(
                "Parameter '{}' does not belong to operation '{}'",
                parameter.name,
                method.name()
            )));
        }
        if source == ArgumentSource::Body && url_template.is_some() {
            return Err(Error::construction(format!(
                "Body argument '{}' cannot carry a URL template",
                parameter.name
            )));
        }
        Ok(Self {
            value: ValueInfo::new(Some(parameter.clone()), url_template, variable_name)?,
            parameter,
            source,
        })
    }

    pub fn parameter(&self) -> &ParameterInfo {
        &self.parameter
    }

    pub fn name(&self) -> &str {
        &self.parameter.name
    }

    pub fn source(&self) -> ArgumentSource {
        self.source
    }

    pub fn url_template(&self) -> Option<&str> {
        self.value.url_template()
    }

    pub fn variable_name(&self) -> Option<&str> {
        self.value.variable_name()
    }

    pub fn value(&self) -> &ValueInfo {
        &self.value
    }
}

/// An operation result and where it is written.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultInfo {
    value: ValueInfo,
    target: ResultTarget,
}

impl ResultInfo {
    /// `output` names one of the method's outputs; `None` is the return value.
    pub fn new(
        method: &MethodInfo,
        output: Option<&str>,
        target: ResultTarget,
        url_template: Option<String>,
        variable_name: Option<String>,
    ) -> Result<Self> {
        let parameter = match output {
            Some(name) => Some(method.output(name).cloned().ok_or_else(|| {
                Error::construction(format!(
                    "Output '{name}' does not belong to operation '{}'",
                    method.name()
                ))
            })?),
            None => None,
        };
        if let ResultTarget::Header(name) = &target {
            if name.trim().is_empty() {
                return Err(Error::construction("Result header name must not be empty"));
            }
        }
        Ok(Self {
            value: ValueInfo::new(parameter, url_template, variable_name)?,
            target,
        })
    }

    /// Output name, `None` for the return value.
    pub fn output(&self) -> Option<&str> {
        self.value.parameter().map(|p| p.name.as_str())
    }

    pub fn target(&self) -> &ResultTarget {
        &self.target
    }

    pub fn url_template(&self) -> Option<&str> {
        self.value.url_template()
    }

    pub fn variable_name(&self) -> Option<&str> {
        self.value.variable_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::TypeInfo;

    fn method() -> MethodInfo {
        MethodInfo::new("Result")
            .with_parameter(ParameterInfo::new("input", TypeInfo::Integer))
            .with_output(ParameterInfo::new("id", TypeInfo::Integer))
    }

    #[test]
    fn test_template_and_variable_are_co_required() {
        let param = ParameterInfo::new("input", TypeInfo::Integer);
        assert!(ValueInfo::new(Some(param.clone()), Some("/{input}".into()), None).is_err());
        assert!(ValueInfo::new(Some(param.clone()), None, Some("input".into())).is_err());
        assert!(ValueInfo::new(Some(param.clone()), Some(String::new()), Some(String::new())).is_err());
        assert!(ValueInfo::new(Some(param), None, None).is_ok());
    }

    #[test]
    fn test_template_must_reference_variable() {
        let param = ParameterInfo::new("input", TypeInfo::Integer);
        assert!(ValueInfo::new(
            Some(param.clone()),
            Some("/x/{other}".into()),
            Some("input".into())
        )
        .is_err());
        assert!(ValueInfo::new(
            Some(param),
            Some("?tags=x{&input*}".into()),
            Some("input".into())
        )
        .is_ok());
    }

    #[test]
    fn test_argument_must_belong_to_method() {
        let method = method();
        let foreign = ParameterInfo::new("other", TypeInfo::String);
        assert!(ArgumentInfo::new(&method, foreign, ArgumentSource::QueryString, None, None).is_err());

        let retyped = ParameterInfo::new("input", TypeInfo::String);
        assert!(ArgumentInfo::new(&method, retyped, ArgumentSource::QueryString, None, None).is_err());

        let own = ParameterInfo::new("input", TypeInfo::Integer);
        let argument = ArgumentInfo::new(
            &method,
            own,
            ArgumentSource::UrlSegment,
            Some("/api/test/result/{input}".into()),
            Some("input".into()),
        );
        assert!(argument.is_ok_and(|a| a.name() == "input"));
    }

    #[test]
    fn test_body_argument_has_no_template() {
        let method = method();
        let own = ParameterInfo::new("input", TypeInfo::Integer);
        let argument = ArgumentInfo::new(
            &method,
            own,
            ArgumentSource::Body,
            Some("/{input}".into()),
            Some("input".into()),
        );
        assert!(argument.is_err());
    }

    #[test]
    fn test_result_output_must_exist() {
        let method = method();
        assert!(ResultInfo::new(&method, Some("missing"), ResultTarget::Body, None, None).is_err());
        let location = ResultInfo::new(
            &method,
            Some("id"),
            ResultTarget::Header("Location".into()),
            Some("/api/person/{id}".into()),
            Some("id".into()),
        );
        assert!(location.is_ok_and(|r| r.output() == Some("id")));
    }
}
