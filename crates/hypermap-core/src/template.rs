//! URL template engine.
//!
//! From an operation's base path and its ordered, source-tagged parameters
//! this module builds:
//!
//! - the aggregate URL template (`/api/person/{id}?expand={expand}`),
//! - an anchored matcher accepting exactly the paths the template produces,
//! - one sub-template per templated argument, plus an extractor used by the
//!   argument binder to read that argument's raw value back out of a request.
//!
//! Path arguments append `/{name}` segments; optional ones become nested
//! optional groups, so a later optional segment can only appear after the
//! earlier one. Query arguments append `?name={name}` / `&name={name}` terms,
//! or the exploded `{?name*}` / `{&name*}` form for collections, and the
//! matcher accepts any subset of them in any order.
//!
//! # Examples
//!
//! ```
//! use hypermap_core::model::ArgumentSource;
//! use hypermap_core::template::{compile, TemplateParameter};
//!
//! let compiled = compile(
//!     "/api/test/result",
//!     &[TemplateParameter::new("input", ArgumentSource::UrlSegment)],
//!     false,
//! )?;
//! assert_eq!(compiled.template.as_deref(), Some("/api/test/result/{input}"));
//! assert_eq!(compiled.matcher.as_str(), "^/api/test/result/[^/?]+$");
//! assert!(compiled.matcher.is_match("/api/test/result/42", None));
//! # Ok::<(), hypermap_core::Error>(())
//! ```

// Internal imports (std, crate)
use std::collections::{BTreeMap, HashSet};

use crate::model::ArgumentSource;
use crate::{Error, Result};

// External imports (alphabetized)
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Regex, RegexBuilder};
use url::form_urlencoded;

/// `{name}`, `{?name*}` or `{&name*}`.
static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([?&]?)([A-Za-z_][A-Za-z0-9_]*)(\*?)\}").expect("expression pattern is valid")
});

/// `name={var}` query fragment.
static QUERY_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^=&{}?]+)=\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("query pattern is valid")
});

/// Token class matched by a path placeholder.
const SEGMENT_TOKEN: &str = "[^/?]+";

/// Characters escaped when expanding a path variable.
const SEGMENT_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One parameter as seen by the template engine.
#[derive(Clone, Copy, Debug)]
pub struct TemplateParameter<'a> {
    pub name: &'a str,
    pub source: ArgumentSource,
    pub is_collection: bool,
    pub optional: bool,
    /// Explicit fragment replacing the default `/{name}` or `name={name}`.
    pub fragment: Option<&'a str>,
}

impl<'a> TemplateParameter<'a> {
    pub fn new(name: &'a str, source: ArgumentSource) -> Self {
        Self {
            name,
            source,
            is_collection: false,
            optional: false,
            fragment: None,
        }
    }

    pub fn collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_fragment(mut self, fragment: &'a str) -> Self {
        self.fragment = Some(fragment);
        self
    }
}

/// Compiled anchored matcher for an operation's URLs.
#[derive(Clone, Debug)]
pub struct UrlMatcher {
    regex: Regex,
    query_keys: Vec<String>,
    case_sensitive: bool,
}

impl UrlMatcher {
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether the pattern also constrains the query string.
    pub fn matches_query(&self) -> bool {
        !self.query_keys.is_empty()
    }

    /// Only declared keys carrying a value take part in matching; unknown
    /// and bare keys in the query string are ignored.
    pub fn is_match(&self, path: &str, query: Option<&str>) -> bool {
        match query.map(|q| self.declared_pairs(q)) {
            Some(pairs) if !pairs.is_empty() => self.regex.is_match(&format!("{path}?{pairs}")),
            _ => self.regex.is_match(path),
        }
    }

    fn declared_pairs(&self, query: &str) -> String {
        query
            .split('&')
            .filter(|pair| match pair.split_once('=') {
                Some((key, _)) => self.query_keys.iter().any(|declared| {
                    if self.case_sensitive {
                        declared == key
                    } else {
                        declared.eq_ignore_ascii_case(key)
                    }
                }),
                None => false,
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Clone, Debug)]
enum Extractor {
    Segment(Regex),
    Query(String),
}

/// Sub-template of one argument and how to read its raw value back.
#[derive(Clone, Debug)]
pub struct ArgumentTemplate {
    pub url_template: String,
    pub variable_name: String,
    extractor: Extractor,
}

impl ArgumentTemplate {
    /// Raw, decoded values of this argument in a request. Empty when absent.
    pub fn extract(&self, path: &str, query: Option<&str>) -> Vec<String> {
        match &self.extractor {
            Extractor::Segment(regex) => regex
                .captures(path)
                .and_then(|caps| caps.get(1))
                .map(|m| {
                    vec![percent_decode_str(m.as_str())
                        .decode_utf8_lossy()
                        .into_owned()]
                })
                .unwrap_or_default(),
            Extractor::Query(key) => query
                .map(|q| {
                    form_urlencoded::parse(q.as_bytes())
                        .filter(|(k, _)| k == key)
                        .map(|(_, v)| v.into_owned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Output of [`compile`].
#[derive(Clone, Debug)]
pub struct CompiledTemplate {
    /// Aggregate template, absent when no argument is templated.
    pub template: Option<String>,
    pub matcher: UrlMatcher,
    /// Index-aligned with the input parameters; `None` for body arguments.
    pub arguments: Vec<Option<ArgumentTemplate>>,
}

/// Build the aggregate template, matcher and per-argument sub-templates.
pub fn compile(
    base_path: &str,
    parameters: &[TemplateParameter<'_>],
    case_sensitive: bool,
) -> Result<CompiledTemplate> {
    let base = normalize_path(base_path);
    let mut path_template = base.clone();
    let mut path_pattern = regex::escape(&base);
    let mut required_prefix = path_pattern.clone();
    let mut open_optional = 0usize;
    let mut query_template = String::new();
    let mut query_keys: Vec<String> = Vec::new();
    let mut variables = HashSet::new();
    let mut arguments = Vec::with_capacity(parameters.len());

    for parameter in parameters {
        let argument = match parameter.source {
            ArgumentSource::Body => None,
            ArgumentSource::UrlSegment => {
                let fragment = match parameter.fragment {
                    Some(fragment) if fragment.starts_with('/') => fragment.to_string(),
                    Some(fragment) => format!("/{fragment}"),
                    None => format!("/{{{}}}", parameter.name),
                };
                let variable = single_variable(&fragment, parameter.name)?;
                if !parameter.optional && open_optional > 0 {
                    return Err(Error::construction(format!(
                        "Required path argument '{}' cannot follow an optional one",
                        parameter.name
                    )));
                }
                let literal = fragment_pattern(&fragment, None);
                let extractor = build_regex(
                    &format!(
                        "^{required_prefix}{}(?:[/?]|$)",
                        fragment_pattern(&fragment, Some(&variable))
                    ),
                    case_sensitive,
                )?;
                if parameter.optional {
                    path_pattern.push_str("(?:");
                    open_optional += 1;
                }
                path_pattern.push_str(&literal);
                required_prefix.push_str(&literal);
                path_template.push_str(&fragment);
                Some(ArgumentTemplate {
                    url_template: path_template.clone(),
                    variable_name: variable,
                    extractor: Extractor::Segment(extractor),
                })
            }
            ArgumentSource::QueryString => {
                let (key, variable) = match parameter.fragment {
                    Some(fragment) => parse_query_fragment(fragment)?,
                    None => (parameter.name.to_string(), parameter.name.to_string()),
                };
                let first = query_template.is_empty();
                if parameter.is_collection {
                    if key != variable {
                        return Err(Error::construction(format!(
                            "Collection query argument '{}' must use its variable as key",
                            parameter.name
                        )));
                    }
                    let operator = if first { '?' } else { '&' };
                    query_template.push_str(&format!("{{{operator}{variable}*}}"));
                } else {
                    let separator = if first { '?' } else { '&' };
                    query_template.push_str(&format!("{separator}{key}={{{variable}}}"));
                }
                if !query_keys.contains(&key) {
                    query_keys.push(key.clone());
                }
                Some(ArgumentTemplate {
                    url_template: query_template.clone(),
                    variable_name: variable,
                    extractor: Extractor::Query(key),
                })
            }
        };
        if let Some(argument) = &argument {
            if !variables.insert(argument.variable_name.clone()) {
                return Err(Error::construction(format!(
                    "Variable '{}' is bound twice",
                    argument.variable_name
                )));
            }
        }
        arguments.push(argument);
    }

    path_pattern.push_str(&")?".repeat(open_optional));
    if path_template.is_empty() {
        path_template.push('/');
        path_pattern.push('/');
    }

    let templated = arguments.iter().any(Option::is_some);
    let template = templated.then(|| format!("{path_template}{query_template}"));
    let query_group = if query_keys.is_empty() {
        String::new()
    } else {
        let names = query_keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        format!(r"(?:\?(?:(?:{names})=[^&]*(?:&(?:{names})=[^&]*)*)?)?")
    };
    let matcher = UrlMatcher {
        regex: build_regex(&format!("^{path_pattern}{query_group}$"), case_sensitive)?,
        query_keys,
        case_sensitive,
    };

    Ok(CompiledTemplate {
        template,
        matcher,
        arguments,
    })
}

/// Leading slash, no doubled or trailing slashes; the root becomes empty.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .fold(String::new(), |mut acc, segment| {
            acc.push('/');
            acc.push_str(segment);
            acc
        })
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()?)
}

fn single_variable(fragment: &str, argument: &str) -> Result<String> {
    let mut found = EXPRESSION.captures_iter(fragment);
    let variable = match (found.next(), found.next()) {
        (Some(caps), None) if caps[1].is_empty() && caps[3].is_empty() => caps[2].to_string(),
        _ => {
            return Err(Error::construction(format!(
                "Fragment '{fragment}' of '{argument}' must contain exactly one {{variable}}"
            )))
        }
    };
    Ok(variable)
}

fn fragment_pattern(fragment: &str, capture: Option<&str>) -> String {
    let mut pattern = String::new();
    let mut last = 0;
    for caps in EXPRESSION.captures_iter(fragment) {
        let Some(whole) = caps.get(0) else { continue };
        pattern.push_str(&regex::escape(&fragment[last..whole.start()]));
        if capture == Some(&caps[2]) {
            pattern.push_str(&format!("({SEGMENT_TOKEN})"));
        } else {
            pattern.push_str(SEGMENT_TOKEN);
        }
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&fragment[last..]));
    pattern
}

fn parse_query_fragment(fragment: &str) -> Result<(String, String)> {
    let trimmed = fragment.trim_start_matches(['?', '&']);
    if let Some(caps) = QUERY_FRAGMENT.captures(trimmed) {
        return Ok((caps[1].to_string(), caps[2].to_string()));
    }
    match EXPRESSION.captures(fragment) {
        Some(caps) if !caps[1].is_empty() && caps[0].len() == fragment.len() => {
            Ok((caps[2].to_string(), caps[2].to_string()))
        }
        _ => Err(Error::construction(format!(
            "Query fragment '{fragment}' must look like 'key={{variable}}'"
        ))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PathPart {
    Literal(String),
    Variable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum QueryTerm {
    Fixed { key: String, value: String },
    Variable { key: String, variable: String },
    Exploded { variable: String },
}

/// A variable referenced by a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateVariable {
    pub name: String,
    pub in_query: bool,
    pub explode: bool,
}

/// A parsed template that can be expanded into a call URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    path: Vec<PathPart>,
    query: Vec<QueryTerm>,
}

impl UrlTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut parsed = Self {
            source: template.to_string(),
            path: Vec::new(),
            query: Vec::new(),
        };
        let mut in_query = false;
        let mut pending_key: Option<String> = None;
        let mut last = 0;
        for caps in EXPRESSION.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            parsed.push_literal(&template[last..whole.start()], &mut in_query, &mut pending_key);
            last = whole.end();
            let variable = caps[2].to_string();
            if !caps[1].is_empty() {
                if pending_key.is_some() {
                    return Err(Error::construction(format!(
                        "Template '{template}' has a dangling query key"
                    )));
                }
                in_query = true;
                parsed.query.push(if caps[3].is_empty() {
                    QueryTerm::Variable {
                        key: variable.clone(),
                        variable,
                    }
                } else {
                    QueryTerm::Exploded { variable }
                });
            } else if in_query {
                let key = pending_key.take().ok_or_else(|| {
                    Error::construction(format!(
                        "Query variable '{variable}' in '{template}' has no key"
                    ))
                })?;
                parsed.query.push(QueryTerm::Variable { key, variable });
            } else {
                parsed.path.push(PathPart::Variable(variable));
            }
        }
        parsed.push_literal(&template[last..], &mut in_query, &mut pending_key);
        if let Some(key) = pending_key {
            parsed.query.push(QueryTerm::Fixed {
                key,
                value: String::new(),
            });
        }
        Ok(parsed)
    }

    fn push_literal(&mut self, literal: &str, in_query: &mut bool, pending_key: &mut Option<String>) {
        let query_part = if *in_query {
            literal
        } else {
            match literal.split_once('?') {
                Some((path, query)) => {
                    *in_query = true;
                    if !path.is_empty() {
                        self.path.push(PathPart::Literal(path.to_string()));
                    }
                    query
                }
                None => {
                    if !literal.is_empty() {
                        self.path.push(PathPart::Literal(literal.to_string()));
                    }
                    return;
                }
            }
        };
        let pieces: Vec<&str> = query_part.split('&').collect();
        let count = pieces.len();
        for (index, piece) in pieces.into_iter().enumerate() {
            if piece.is_empty() {
                continue;
            }
            if index + 1 == count {
                if let Some(key) = piece.strip_suffix('=') {
                    *pending_key = Some(key.to_string());
                    continue;
                }
            }
            let (key, value) = piece.split_once('=').unwrap_or((piece, ""));
            self.query.push(QueryTerm::Fixed {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Variables in template order.
    pub fn variables(&self) -> Vec<TemplateVariable> {
        let path = self.path.iter().filter_map(|part| match part {
            PathPart::Variable(name) => Some(TemplateVariable {
                name: name.clone(),
                in_query: false,
                explode: false,
            }),
            PathPart::Literal(_) => None,
        });
        let query = self.query.iter().filter_map(|term| match term {
            QueryTerm::Variable { variable, .. } => Some(TemplateVariable {
                name: variable.clone(),
                in_query: true,
                explode: false,
            }),
            QueryTerm::Exploded { variable } => Some(TemplateVariable {
                name: variable.clone(),
                in_query: true,
                explode: true,
            }),
            QueryTerm::Fixed { .. } => None,
        });
        path.chain(query).collect()
    }

    /// Expand into a concrete URL. Missing path variables drop their segment,
    /// missing query variables drop their term.
    pub fn expand(&self, values: &BTreeMap<String, Vec<String>>) -> String {
        let present = |name: &str| values.get(name).filter(|v| !v.is_empty());
        let mut url = String::new();
        for part in &self.path {
            match part {
                PathPart::Literal(literal) => url.push_str(literal),
                PathPart::Variable(name) => match present(name) {
                    Some(items) => {
                        let encoded: Vec<String> = items
                            .iter()
                            .map(|v| utf8_percent_encode(v, SEGMENT_ENCODE).to_string())
                            .collect();
                        url.push_str(&encoded.join(","));
                    }
                    None => {
                        while url.ends_with('/') {
                            url.pop();
                        }
                    }
                },
            }
        }
        if url.is_empty() {
            url.push('/');
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for term in &self.query {
            match term {
                QueryTerm::Fixed { key, value } => {
                    query.append_pair(key, value);
                    any = true;
                }
                QueryTerm::Variable { key, variable } => {
                    if let Some(first) = present(variable).and_then(|v| v.first()) {
                        query.append_pair(key, first);
                        any = true;
                    }
                }
                QueryTerm::Exploded { variable } => {
                    for value in present(variable).into_iter().flatten() {
                        query.append_pair(variable, value);
                        any = true;
                    }
                }
            }
        }
        if any {
            url.push('?');
            url.push_str(&query.finish());
        }
        url
    }
}
