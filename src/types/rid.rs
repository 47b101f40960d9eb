//! Resource identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A resource identifier.
///
/// An opaque dot-separated string naming a resource on the gateway, e.g.
/// `messageService.messages` or `userService.user.42`. The client treats it
/// purely as a cache key; only the type registries interpret its segments,
/// and then only for pattern matching.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rid(String);

impl Rid {
    /// Wrap a resource id string.
    pub fn new(rid: impl Into<String>) -> Self {
        Rid(rid.into())
    }

    /// The id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty. Empty ids are rejected by the public API.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Rid {
    fn from(s: &str) -> Self {
        Rid(s.to_string())
    }
}

impl From<String> for Rid {
    fn from(s: String) -> Self {
        Rid(s)
    }
}

impl AsRef<str> for Rid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Rid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_display_roundtrip() {
        let rid = Rid::new("a.b.c");
        assert_eq!(rid.to_string(), "a.b.c");
        assert_eq!(rid.as_str(), "a.b.c");
    }

    #[test]
    fn test_borrow_lookup() {
        let mut map: HashMap<Rid, u32> = HashMap::new();
        map.insert(Rid::new("x.a"), 1);
        assert_eq!(map.get("x.a"), Some(&1));
    }

    #[test]
    fn test_serde_transparent() {
        let rid: Rid = serde_json::from_str("\"x.a\"").unwrap();
        assert_eq!(rid, Rid::new("x.a"));
        assert_eq!(serde_json::to_string(&rid).unwrap(), "\"x.a\"");
    }
}
