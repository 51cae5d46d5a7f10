// SPDX-License-Identifier: MIT OR Apache-2.0
//! The immutable `Fqdn` identifier: `<org>.<project>.<namespace>.<action>.<4-hex-hash>`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Immutable identifier for a capability or registered MCP server record.
///
/// The `hash` segment is derived from the capability's `code`
/// (see [`Fqdn::hash_code`]) and never changes for a given `fqdn` row
///.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn {
    org: String,
    project: String,
    namespace: String,
    action: String,
    hash: String,
}

impl schemars::JsonSchema for Fqdn {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "Fqdn".into()
    }

    fn schema_id() -> std::borrow::Cow<'static, str> {
        concat!(module_path!(), "::Fqdn").into()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        <String as schemars::JsonSchema>::json_schema(generator)
    }
}

/// Errors parsing a string into an [`Fqdn`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FqdnParseError {
    /// The string did not have exactly five dot-separated segments.
    #[error("fqdn must have exactly 5 segments (org.project.namespace.action.hash), got {0}")]
    WrongSegmentCount(usize),
    /// The hash segment was not exactly 4 lowercase hex characters.
    #[error("fqdn hash segment must be 4 lowercase hex characters, got `{0}`")]
    InvalidHash(String),
    /// One of the non-hash segments was empty.
    #[error("fqdn segments must be non-empty")]
    EmptySegment,
}

impl Fqdn {
    /// Construct an `Fqdn` from its parts, computing the hash segment from
    /// `code` via [`Self::hash_code`].
    pub fn new(org: impl Into<String>, project: impl Into<String>, namespace: impl Into<String>, action: impl Into<String>, code: &str) -> Self {
        Self {
            org: org.into(),
            project: project.into(),
            namespace: namespace.into(),
            action: action.into(),
            hash: Self::hash_code(code),
        }
    }

    /// Compute the 4-hex-character content hash used as the final `Fqdn`
    /// segment: the first 4 hex digits of the SHA-256 digest of `code`.
    #[must_use]
    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        let digest = hasher.finalize();
        format!("{:02x}{:02x}", digest[0], digest[1])
    }

    /// Organization segment.
    #[must_use]
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Project segment.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Namespace segment.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Action segment.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// 4-hex-character content hash segment.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// `(org, project)` scope tuple used for display-name uniqueness.
    #[must_use]
    pub fn scope(&self) -> (&str, &str) {
        (&self.org, &self.project)
    }

    /// Holds iff `hash(code) == fqdn.suffix`.
    #[must_use]
    pub fn matches_code(&self, code: &str) -> bool {
        self.hash == Self::hash_code(code)
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}.{}", self.org, self.project, self.namespace, self.action, self.hash)
    }
}

impl FromStr for Fqdn {
    type Err = FqdnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 5 {
            return Err(FqdnParseError::WrongSegmentCount(parts.len()));
        }
        let [org, project, namespace, action, hash] = [parts[0], parts[1], parts[2], parts[3], parts[4]];
        if org.is_empty() || project.is_empty() || namespace.is_empty() || action.is_empty() {
            return Err(FqdnParseError::EmptySegment);
        }
        if hash.len() != 4 || !hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(FqdnParseError::InvalidHash(hash.to_string()));
        }
        Ok(Self {
            org: org.to_string(),
            project: project.to_string(),
            namespace: namespace.to_string(),
            action: action.to_string(),
            hash: hash.to_string(),
        })
    }
}

impl TryFrom<String> for Fqdn {
    type Error = FqdnParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fqdn> for String {
    fn from(value: Fqdn) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_via_display_and_parse() {
        let f = Fqdn::new("local", "default", "fs", "read_json", "const x = 1;");
        let s = f.to_string();
        let back: Fqdn = s.parse().unwrap();
        assert_eq!(f, back);
    }

    #[test]
    fn hash_is_deterministic_and_four_hex_chars() {
        let a = Fqdn::hash_code("same code");
        let b = Fqdn::hash_code("same code");
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_code_usually_differs_in_hash() {
        let a = Fqdn::hash_code("alpha");
        let b = Fqdn::hash_code("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn matches_code_enforces_p1() {
        let f = Fqdn::new("local", "default", "fs", "read_json", "const x = 1;");
        assert!(f.matches_code("const x = 1;"));
        assert!(!f.matches_code("const x = 2;"));
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!("a.b.c".parse::<Fqdn>(), Err(FqdnParseError::WrongSegmentCount(3))));
    }

    #[test]
    fn rejects_uppercase_or_short_hash() {
        assert!("a.b.c.d.ABCD".parse::<Fqdn>().is_err());
        assert!("a.b.c.d.ab".parse::<Fqdn>().is_err());
    }

    #[test]
    fn scope_is_org_and_project() {
        let f = Fqdn::new("acme", "proj1", "fs", "read", "code");
        assert_eq!(f.scope(), ("acme", "proj1"));
    }
}
