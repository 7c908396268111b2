//! Asserted attribute lookup and mapping.
//!
//! The SP module in front of the bridge asserts identity attributes as
//! request variables. Some deployments see them under a `REDIRECT_` prefix
//! after an internal rewrite, so the real source falls back to that name.
//! The emulated IdP supplies its own attribute set with no fallback.

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;

/// Prefix an internal rewrite puts in front of asserted variable names.
pub const REDIRECT_PREFIX: &str = "REDIRECT_";

/// Canonical field → asserted value.
pub type MappedAttributes = BTreeMap<String, String>;

/// Read-only lookup of asserted variables by name.
pub trait VariableSource {
    /// Value of the named variable. Absent when the variable is not
    /// asserted at all.
    fn variable(&self, name: &str) -> Option<String>;
}

/// Variables asserted by the SP as request headers.
pub struct ServerVariables<'a> {
    headers: &'a HeaderMap,
}

impl<'a> ServerVariables<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }

    fn raw(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    }
}

impl VariableSource for ServerVariables<'_> {
    fn variable(&self, name: &str) -> Option<String> {
        match self.raw(name) {
            Some(value) if !value.is_empty() => Some(value),
            primary => self
                .raw(&format!("{REDIRECT_PREFIX}{name}"))
                .or(primary),
        }
    }
}

/// Variables released by the emulated IdP.
#[derive(Debug, Clone, Default)]
pub struct EmulatedVariables {
    vars: HashMap<String, String>,
}

impl EmulatedVariables {
    pub fn new(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }
}

impl VariableSource for EmulatedVariables {
    fn variable(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Build the canonical attribute record.
///
/// Every field in `map` appears in the result exactly once. Attributes the
/// IdP did not assert map to an empty string.
pub fn map_attributes(
    map: &BTreeMap<String, String>,
    source: &dyn VariableSource,
) -> MappedAttributes {
    map.iter()
        .map(|(field, attr)| (field.clone(), source.variable(attr).unwrap_or_default()))
        .collect()
}
