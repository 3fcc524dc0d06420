//! Store keys derived from call identities.

use std::fmt;

/// The identities a call is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallIdentity {
    /// The guarded resource, e.g. a normalized request path.
    pub resource: String,
    /// The calling client, e.g. its network address.
    pub caller: String,
}

impl CallIdentity {
    /// Create a new call identity.
    pub fn new(resource: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            caller: caller.into(),
        }
    }
}

/// A key in the shared window store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey(String);

impl WindowKey {
    /// The key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WindowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds window keys under a fixed namespace prefix.
///
/// The key layout is `{prefix}{resource length}:{resource}:{caller}`. Because the byte length
/// of the resource comes first, the boundary between the two identities is always known and
/// no two identity pairs map to the same key, whatever characters they contain.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Create a key builder for the given namespace prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// The namespace prefix of every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derive the window key for a (resource, caller) pair.
    pub fn build(&self, resource: &str, caller: &str) -> WindowKey {
        WindowKey(format!("{}{}:{resource}:{caller}", self.prefix, resource.len()))
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(config::DEFAULT_KEY_PREFIX)
    }
}
