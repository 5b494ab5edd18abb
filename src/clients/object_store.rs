//! # Object Store
//!
//! Scratch storage for descriptor pages too large to inline in an invocation payload.
//! Each key is written once by a single dispatcher and only read afterwards; entries
//! carry an expiry because they are job-scoped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const SCHEME: &str = "store://";

/// Location of a stored object, rendered as `store://{bucket}/{key}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ObjectRef {
    type Err = ObjectStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| ObjectStoreError::InvalidReference {
            key: s.to_string(),
        })?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(ObjectStoreError::InvalidReference { key: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Object expired: {key}")]
    Expired { key: String },

    #[error("Invalid object reference: {key}")]
    InvalidReference { key: String },

    #[error("Object store I/O error for {key}: {reason}")]
    Io { key: String, reason: String },
}

impl ObjectStoreError {
    pub fn key(&self) -> &str {
        match self {
            Self::NotFound { key }
            | Self::Expired { key }
            | Self::InvalidReference { key }
            | Self::Io { key, .. } => key,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `payload` under `key` for at most `ttl`
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<ObjectRef, ObjectStoreError>;

    async fn get(&self, reference: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError>;

    async fn delete(&self, reference: &ObjectRef) -> Result<(), ObjectStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display_and_parse() {
        let reference = ObjectRef::new("scratch", "jobs/abc/batches/0-10.json");
        let rendered = reference.to_string();
        assert_eq!(rendered, "store://scratch/jobs/abc/batches/0-10.json");
        assert_eq!(rendered.parse::<ObjectRef>().unwrap(), reference);
    }

    #[test]
    fn test_object_ref_parse_rejects_malformed() {
        assert!("s3://bucket/key".parse::<ObjectRef>().is_err());
        assert!("store://bucket".parse::<ObjectRef>().is_err());
        assert!("store:///key".parse::<ObjectRef>().is_err());
    }
}
