use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw article fields handed to the quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub text: String,
}

impl Article {
    pub fn new(title: impl Into<String>, url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            text: text.into(),
        }
    }
}

/// Side-car record stored next to each member of the distributed content set.
///
/// Its expiry stands in for the per-member TTL the set itself lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashMetadata {
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ContentHashMetadata {
    pub fn new(url: Option<String>, namespace: Option<String>) -> Self {
        Self {
            url,
            namespace,
            recorded_at: Utc::now(),
        }
    }
}

impl Default for ContentHashMetadata {
    fn default() -> Self {
        Self::new(None, None)
    }
}
