//! Content-derived job identifiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};

const SHORT_LEN: usize = 12;

/// A job identifier derived from the job's semantic content.
///
/// Two submissions describing the same work hash to the same id, which is
/// what makes submission idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derives an id from any serializable description of a job.
    ///
    /// The value is rendered as canonical JSON (object keys sorted at every
    /// depth, no whitespace) and hashed with SHA-256.
    pub fn from_content<T: Serialize + ?Sized>(content: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(content)?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical)?;
        Ok(Self(hex::encode(Sha256::digest(canonical.as_bytes()))))
    }

    /// Wraps an existing id string without hashing.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_LEN) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(val, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_content_same_id() {
        let a = JobId::from_content(&json!({"capability": "x", "params": {"query": "q", "count": 10}})).unwrap();
        let b = JobId::from_content(&json!({"params": {"count": 10, "query": "q"}, "capability": "x"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_different_content_different_id() {
        let a = JobId::from_content(&json!({"query": "rust"})).unwrap();
        let b = JobId::from_content(&json!({"query": "go"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = JobId::from_content(&json!({"tags": [1, 2]})).unwrap();
        let b = JobId::from_content(&json!({"tags": [2, 1]})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_prefix() {
        let id = JobId::from_string("abcdef0123456789");
        assert_eq!(id.short(), "abcdef012345");
        assert_eq!(JobId::from("abc").short(), "abc");
    }

    #[test]
    fn test_short_prefix_multibyte() {
        let id = JobId::from("abcdefghijké-tail");
        assert_eq!(id.short(), "abcdefghijké");
        let id = JobId::from("ééééééééééééé");
        assert_eq!(id.short(), "éééééééééééé");
    }

    #[test]
    fn test_serde_transparent() {
        let id = JobId::from("deadbeef");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"deadbeef\"");
    }
}
