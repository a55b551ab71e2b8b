//! Minimal request/response model at the transport boundary.
//!
//! Stream and header plumbing belongs to whatever server hosts the engine;
//! this module only carries what dispatch, binding and negotiation read:
//! the verb, the URL, a case-insensitive header map, the raw body and the
//! caller identity.

// Internal imports (std, crate)
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::security::Identity;

// External imports (alphabetized)
use serde::{Deserialize, Serialize};
use url::Url;

/// Base used to resolve relative request targets.
const LOCAL_BASE: &str = "http://localhost/";

/// Protocol-specific command of an operation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Verb {
    /// Canonical upper-case token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether requests with this verb conventionally carry a body.
    pub fn carries_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(crate::Error::construction(format!(
                "Unknown verb '{other}'"
            ))),
        }
    }
}

/// Case-insensitive header map. Names are stored lower-cased.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Inbound request as seen by the dispatcher.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: Verb,
    pub url: Url,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub identity: Identity,
}

impl RequestInfo {
    /// Create a request for an absolute URL or a path-and-query target.
    pub fn new(method: Verb, target: &str) -> crate::Result<Self> {
        let url = match Url::parse(target) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(LOCAL_BASE)?.join(target)?,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            method,
            url,
            headers: Headers::new(),
            body: Vec::new(),
            identity: Identity::anonymous(),
        })
    }

    pub fn with_header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Raw (still percent-encoded) path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Path used for routing: no trailing slash except for the root.
    pub fn route_path(&self) -> &str {
        match self.url.path().trim_end_matches('/') {
            "" => "/",
            path => path,
        }
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.query().filter(|q| !q.is_empty())
    }

    /// Essence of the declared content type, e.g. `application/json`.
    pub fn content_type(&self) -> Option<String> {
        self.headers.get("content-type").map(media_type_essence)
    }

    /// Acceptable media ranges from the `Accept` header, highest quality
    /// first and in declaration order among equal qualities. Ranges with
    /// `q=0` are left out.
    pub fn accept(&self) -> Vec<String> {
        let Some(value) = self.headers.get("accept") else {
            return Vec::new();
        };
        let mut ranges: Vec<(f32, String)> = value
            .split(',')
            .map(|range| (quality(range), media_type_essence(range)))
            .filter(|(q, m)| *q > 0.0 && !m.is_empty())
            .collect();
        ranges.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranges.into_iter().map(|(_, m)| m).collect()
    }
}

/// Outbound response produced by the request pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseInfo {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Body decoded as UTF-8, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Strip parameters and normalize case: `Text/Plain; charset=utf-8` -> `text/plain`.
pub fn media_type_essence(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// The `q` parameter of a media range; 1 when absent or malformed.
fn quality(range: &str) -> f32 {
    range
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, q)| q.trim().parse::<f32>().ok())
        .map_or(1.0, |q| q.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_target_resolves_against_local_base() -> crate::Result<()> {
        let request = RequestInfo::new(Verb::Get, "/api/test/result/42?x=1")?;
        assert_eq!(request.path(), "/api/test/result/42");
        assert_eq!(request.query(), Some("x=1"));
        Ok(())
    }

    #[test]
    fn test_empty_query_is_absent() -> crate::Result<()> {
        let request = RequestInfo::new(Verb::Get, "/api/test?")?;
        assert_eq!(request.query(), None);
        Ok(())
    }

    #[test]
    fn test_headers_are_case_insensitive() -> crate::Result<()> {
        let request = RequestInfo::new(Verb::Post, "/x")?
            .with_header("Content-Type", "Application/JSON; charset=utf-8")
            .with_header("ACCEPT", "text/plain, application/*;q=0.5");
        assert_eq!(request.content_type().as_deref(), Some("application/json"));
        assert_eq!(request.accept(), vec!["text/plain", "application/*"]);
        Ok(())
    }

    #[test]
    fn test_accept_honours_quality() -> crate::Result<()> {
        let request = RequestInfo::new(Verb::Get, "/x")?.with_header(
            "Accept",
            "text/plain;q=0, text/yaml;q=0.5, application/json, application/xml;q=0.5",
        );
        assert_eq!(
            request.accept(),
            vec!["application/json", "text/yaml", "application/xml"]
        );

        let nothing = RequestInfo::new(Verb::Get, "/x")?.with_header("Accept", "*/*;q=0");
        assert!(nothing.accept().is_empty());
        Ok(())
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!("get".parse::<Verb>().ok(), Some(Verb::Get));
        assert_eq!(" Delete ".parse::<Verb>().ok(), Some(Verb::Delete));
        assert!("FETCH".parse::<Verb>().is_err());
        assert!(Verb::Put.carries_body());
        assert!(!Verb::Get.carries_body());
    }
}
