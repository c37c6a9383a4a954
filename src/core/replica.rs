use serde::{Deserialize, Serialize};
use std::fmt;

/// One database instance participating in the cluster.
///
/// Replicas are ordered by id; per-replica result maps iterate in that order,
/// which makes "the first replica that answered" deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Replica {
    id: String,
}

impl Replica {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Replica {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
