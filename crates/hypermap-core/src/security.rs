//! Claim-based access policy attached to controllers and operations.
//!
//! Every securable resource declares its own allowed and denied claims and
//! points at its owner (operation -> controller). The effective policy is
//! computed once per resource by folding the ownership chain root-to-leaf,
//! letting the most specific declaration win for each claim pair.

// Internal imports (std, crate)
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::{Error, Result};

// External imports (alphabetized)
use log::debug;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Claim type used for role membership.
pub const ROLE: &str = "role";

/// A named attribute of an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

/// Caller identity as established by the transport layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    name: Option<String>,
    claims: Vec<Claim>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            claims: Vec::new(),
        }
    }

    pub fn with_claim<T: Into<String>, V: Into<String>>(mut self, claim_type: T, value: V) -> Self {
        self.claims.push(Claim {
            claim_type: claim_type.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_role<V: Into<String>>(self, role: V) -> Self {
        self.with_claim(ROLE, role)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.name.is_some()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Values this identity holds for the given claim type.
    pub fn values_of<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }
}

/// Claim type -> set of claim values.
///
/// An empty value set means any value of that claim type suffices. A claim
/// type that is absent was never declared, which is distinct from declared
/// with an empty set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecuritySpecificationInfo {
    claims: BTreeMap<String, BTreeSet<String>>,
}

impl SecuritySpecificationInfo {
    /// Declare values for a claim type. Without values the whole value set
    /// is replaced by "any value".
    pub fn add(&mut self, claim_type: &str, values: &[&str]) {
        let entry = self.claims.entry(claim_type.to_string()).or_default();
        if values.is_empty() {
            entry.clear();
            return;
        }
        entry.extend(values.iter().map(|v| v.to_string()));
    }

    /// Remove values of a claim type. Without values the claim type is
    /// removed entirely; removing the last declared value removes it too.
    pub fn remove(&mut self, claim_type: &str, values: &[&str]) {
        if values.is_empty() {
            self.claims.remove(claim_type);
            return;
        }
        let Some(existing) = self.claims.get_mut(claim_type) else {
            return;
        };
        if existing.is_empty() {
            return;
        }
        for value in values {
            existing.remove(*value);
        }
        if existing.is_empty() {
            self.claims.remove(claim_type);
        }
    }

    /// Remove exactly the given claim pairs. Without values only a
    /// claim-wide declaration is removed; specific values are kept.
    pub fn remove_pairs(&mut self, claim_type: &str, values: &[&str]) {
        let claim_wide = self.claims.get(claim_type).map(BTreeSet::is_empty);
        match (claim_wide, values.is_empty()) {
            (Some(true), true) => {
                self.claims.remove(claim_type);
            }
            (Some(_), false) => self.remove(claim_type, values),
            _ => {}
        }
    }

    /// Declared values for a claim type, `None` when never declared.
    pub fn get(&self, claim_type: &str) -> Option<&BTreeSet<String>> {
        self.claims.get(claim_type)
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.claims.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any declared claim pair is held by the identity.
    pub fn matches(&self, identity: &Identity) -> bool {
        self.claims.iter().any(|(claim_type, values)| {
            identity
                .values_of(claim_type)
                .any(|held| values.is_empty() || values.contains(held))
        })
    }
}

/// Allowed and denied claims, mutually exclusive per claim pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRequirements {
    #[serde(default, skip_serializing_if = "SecuritySpecificationInfo::is_empty")]
    pub allowed: SecuritySpecificationInfo,
    #[serde(default, skip_serializing_if = "SecuritySpecificationInfo::is_empty")]
    pub denied: SecuritySpecificationInfo,
}

impl SecurityRequirements {
    pub fn allow(&mut self, claim_type: &str, values: &[&str]) {
        self.allowed.add(claim_type, values);
        self.denied.remove_pairs(claim_type, values);
    }

    pub fn deny(&mut self, claim_type: &str, values: &[&str]) {
        self.denied.add(claim_type, values);
        self.allowed.remove_pairs(claim_type, values);
    }

    pub fn disallow(&mut self, claim_type: &str, values: &[&str]) {
        self.allowed.remove(claim_type, values);
    }

    pub fn undeny(&mut self, claim_type: &str, values: &[&str]) {
        self.denied.remove(claim_type, values);
    }

    /// Layer `other` on top of `self`; `other`'s declarations win.
    pub fn override_with(&self, other: &SecurityRequirements) -> SecurityRequirements {
        let mut result = self.clone();
        for (claim_type, values) in other.allowed.iter() {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            result.allow(claim_type, &values);
        }
        for (claim_type, values) in other.denied.iter() {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            result.deny(claim_type, &values);
        }
        result
    }

    /// Deny wins outright; an empty allow list admits everyone else.
    pub fn allows(&self, identity: &Identity) -> bool {
        if self.denied.matches(identity) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.matches(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.denied.is_empty()
    }
}

/// A resource with its own declarations and an owner it inherits from.
#[derive(Debug, Default)]
pub struct SecurableResourceInfo {
    declared: SecurityRequirements,
    owner: Option<Arc<SecurableResourceInfo>>,
    unified: OnceCell<SecurityRequirements>,
}

impl SecurableResourceInfo {
    pub fn new(declared: SecurityRequirements) -> Self {
        Self {
            declared,
            owner: None,
            unified: OnceCell::new(),
        }
    }

    pub fn owned_by(mut self, owner: Arc<SecurableResourceInfo>) -> Self {
        self.owner = Some(owner);
        self.unified = OnceCell::new();
        self
    }

    pub fn owner(&self) -> Option<&Arc<SecurableResourceInfo>> {
        self.owner.as_ref()
    }

    pub fn declared(&self) -> &SecurityRequirements {
        &self.declared
    }

    pub fn allow(&mut self, claim_type: &str, values: &[&str]) {
        self.declared.allow(claim_type, values);
        self.unified = OnceCell::new();
    }

    pub fn deny(&mut self, claim_type: &str, values: &[&str]) {
        self.declared.deny(claim_type, values);
        self.unified = OnceCell::new();
    }

    pub fn disallow(&mut self, claim_type: &str, values: &[&str]) {
        self.declared.disallow(claim_type, values);
        self.unified = OnceCell::new();
    }

    pub fn undeny(&mut self, claim_type: &str, values: &[&str]) {
        self.declared.undeny(claim_type, values);
        self.unified = OnceCell::new();
    }

    /// Effective policy of this resource, computed on first use.
    pub fn unified_security_requirements(&self) -> &SecurityRequirements {
        self.unified.get_or_init(|| {
            let mut chain = vec![&self.declared];
            let mut current = self.owner.as_deref();
            while let Some(owner) = current {
                chain.push(&owner.declared);
                current = owner.owner.as_deref();
            }
            chain
                .into_iter()
                .rev()
                .fold(SecurityRequirements::default(), |acc, node| {
                    acc.override_with(node)
                })
        })
    }

    pub fn allows(&self, identity: &Identity) -> bool {
        self.unified_security_requirements().allows(identity)
    }

    /// Gate a call on this resource.
    pub fn authorize(&self, identity: &Identity, resource: &str) -> Result<()> {
        if self.allows(identity) {
            return Ok(());
        }
        debug!("access to {resource} rejected for {:?}", identity.name());
        if identity.is_authenticated() {
            Err(Error::AccessDenied(resource.to_string()))
        } else {
            Err(Error::UnauthenticatedAccess(resource.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(owner: Option<Arc<SecurableResourceInfo>>) -> SecurableResourceInfo {
        let resource = SecurableResourceInfo::default();
        match owner {
            Some(owner) => resource.owned_by(owner),
            None => resource,
        }
    }

    #[test]
    fn test_add_then_remove_claim_type_is_undeclared() {
        let mut claims = SecuritySpecificationInfo::default();
        claims.add("role", &[]);
        assert_eq!(claims.get("role"), Some(&BTreeSet::new()));
        claims.remove("role", &[]);
        assert_eq!(claims.get("role"), None);
    }

    #[test]
    fn test_removing_last_value_undeclares_claim_type() {
        let mut claims = SecuritySpecificationInfo::default();
        claims.add("role", &["admin", "editor"]);
        claims.remove("role", &["admin"]);
        assert_eq!(claims.get("role").map(BTreeSet::len), Some(1));
        claims.remove("role", &["editor"]);
        assert_eq!(claims.get("role"), None);
    }

    #[test]
    fn test_allow_then_deny_is_mutually_exclusive() {
        let mut resource = SecurableResourceInfo::default();
        resource.allow("role", &["admin"]);
        resource.deny("role", &["admin"]);
        let declared = resource.declared();
        assert_eq!(declared.allowed.get("role"), None);
        assert!(declared
            .denied
            .get("role")
            .is_some_and(|values| values.contains("admin")));

        resource.allow("role", &["admin"]);
        let declared = resource.declared();
        assert!(declared
            .allowed
            .get("role")
            .is_some_and(|values| values.contains("admin")));
        assert_eq!(declared.denied.get("role"), None);
    }

    #[test]
    fn test_leaf_allow_overrides_inherited_deny() {
        let mut root = SecurableResourceInfo::default();
        root.deny("role", &["guest"]);
        let mut leaf = node(Some(Arc::new(root)));
        leaf.allow("role", &["guest"]);

        let unified = leaf.unified_security_requirements();
        assert_eq!(unified.denied.get("role"), None);
        assert!(leaf.allows(&Identity::named("g").with_role("guest")));
    }

    #[test]
    fn test_claim_wide_allow_replaces_inherited_values() {
        let mut root = SecurableResourceInfo::default();
        root.allow("role", &["admin", "editor"]);
        let mut leaf = node(Some(Arc::new(root)));
        leaf.allow("role", &[]);

        let unified = leaf.unified_security_requirements();
        assert_eq!(unified.allowed.get("role"), Some(&BTreeSet::new()));
        assert!(leaf.allows(&Identity::named("v").with_role("viewer")));
    }

    #[test]
    fn test_claim_wide_allow_keeps_inherited_specific_deny() {
        let mut root = SecurableResourceInfo::default();
        root.deny("role", &["banned"]);
        let mut leaf = node(Some(Arc::new(root)));
        leaf.allow("role", &[]);

        let unified = leaf.unified_security_requirements();
        assert_eq!(unified.allowed.get("role"), Some(&BTreeSet::new()));
        assert!(unified
            .denied
            .get("role")
            .is_some_and(|values| values.contains("banned")));
        assert!(!leaf.allows(&Identity::named("b").with_role("banned")));
        assert!(leaf.allows(&Identity::named("v").with_role("viewer")));
    }

    #[test]
    fn test_claim_wide_allow_overrides_claim_wide_deny() {
        let mut root = SecurableResourceInfo::default();
        root.deny("role", &[]);
        let mut leaf = node(Some(Arc::new(root)));
        leaf.allow("role", &[]);

        let unified = leaf.unified_security_requirements();
        assert_eq!(unified.denied.get("role"), None);
        assert!(leaf.allows(&Identity::named("v").with_role("viewer")));
    }

    #[test]
    fn test_deny_wins_outright() {
        let mut resource = SecurableResourceInfo::default();
        resource.allow("role", &["admin"]);
        resource.deny("department", &["sales"]);
        let identity = Identity::named("x")
            .with_role("admin")
            .with_claim("department", "sales");
        assert!(!resource.allows(&identity));
        assert!(resource.allows(&Identity::named("y").with_role("admin")));
    }

    #[test]
    fn test_empty_allowed_admits_everyone_not_denied() {
        let resource = SecurableResourceInfo::default();
        assert!(resource.allows(&Identity::anonymous()));
    }

    #[test]
    fn test_authorize_distinguishes_anonymous_from_denied() {
        let mut resource = SecurableResourceInfo::default();
        resource.allow("role", &["admin"]);
        let anonymous = resource.authorize(&Identity::anonymous(), "/api/person");
        assert!(matches!(anonymous, Err(Error::UnauthenticatedAccess(_))));
        let outsider = resource.authorize(&Identity::named("o").with_role("user"), "/api/person");
        assert!(matches!(outsider, Err(Error::AccessDenied(_))));
        assert!(resource
            .authorize(&Identity::named("a").with_role("admin"), "/api/person")
            .is_ok());
    }

    #[test]
    fn test_unification_folds_left_along_the_chain() {
        let mut a = SecurableResourceInfo::default();
        a.allow("role", &["admin", "editor"]);
        a.deny("ip", &["10.0.0.1"]);
        let a = Arc::new(a);

        let mut b = node(Some(a.clone()));
        b.deny("role", &["editor"]);
        b.allow("ip", &["10.0.0.1"]);
        let b = Arc::new(b);

        let mut c = node(Some(b.clone()));
        c.allow("role", &["editor"]);
        c.deny("scope", &[]);

        let a_with_b = a.declared().override_with(b.declared());
        let stepwise = a_with_b.override_with(c.declared());
        assert_eq!(c.unified_security_requirements(), &stepwise);
        assert_eq!(b.unified_security_requirements(), &a_with_b);
    }

    #[test]
    fn test_unified_view_is_memoized() {
        let mut resource = SecurableResourceInfo::default();
        resource.allow("role", &["admin"]);
        let first = resource.unified_security_requirements() as *const _;
        let second = resource.unified_security_requirements() as *const _;
        assert_eq!(first, second);
    }
}
