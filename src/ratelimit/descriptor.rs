//! Hierarchical rate limit descriptors.

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::rules::LimitUnit;
use crate::proto;

/// Descriptor key for leaves matching a caller fingerprint.
pub const AUTH_KEY: &str = "auth5";
/// Descriptor key for branches matching a request path.
pub const PATH_KEY: &str = "path";

/// The limit attached to a leaf descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct LimitPolicy {
    pub unit: LimitUnit,
    pub requests_per_unit: u32,
}

/// A node in the rate limit matching tree.
///
/// Leaves always carry a limit and never have children; branches never carry a
/// limit. Branches are only ever built with at least one child, but that part is
/// checked when a snapshot is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// Matches a caller by the trailing characters of its secret
    Leaf {
        fingerprint: String,
        limit: LimitPolicy,
    },
    /// Groups leaves under a request path
    Branch {
        endpoint: String,
        children: Vec<Descriptor>,
    },
}

impl Descriptor {
    /// Create a leaf descriptor.
    pub fn leaf(fingerprint: impl Into<String>, unit: LimitUnit, requests_per_unit: u32) -> Self {
        Descriptor::Leaf {
            fingerprint: fingerprint.into(),
            limit: LimitPolicy {
                unit,
                requests_per_unit,
            },
        }
    }

    /// Create a branch descriptor.
    pub fn branch(endpoint: impl Into<String>, children: Vec<Descriptor>) -> Self {
        Descriptor::Branch {
            endpoint: endpoint.into(),
            children,
        }
    }

    /// The descriptor key this node matches on.
    pub fn key(&self) -> &'static str {
        match self {
            Descriptor::Leaf { .. } => AUTH_KEY,
            Descriptor::Branch { .. } => PATH_KEY,
        }
    }

    /// The value this node matches.
    pub fn value(&self) -> &str {
        match self {
            Descriptor::Leaf { fingerprint, .. } => fingerprint,
            Descriptor::Branch { endpoint, .. } => endpoint,
        }
    }

    pub fn limit(&self) -> Option<&LimitPolicy> {
        match self {
            Descriptor::Leaf { limit, .. } => Some(limit),
            Descriptor::Branch { .. } => None,
        }
    }

    pub fn children(&self) -> &[Descriptor] {
        match self {
            Descriptor::Leaf { .. } => &[],
            Descriptor::Branch { children, .. } => children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Descriptor::Leaf { .. })
    }

    /// Convert to the wire message.
    pub fn to_proto(&self) -> proto::RateLimitDescriptor {
        proto::RateLimitDescriptor {
            key: self.key().to_string(),
            value: self.value().to_string(),
            rate_limit: self.limit().map(|limit| proto::RateLimitPolicy {
                unit: proto::RateLimitUnit::from(limit.unit) as i32,
                requests_per_unit: limit.requests_per_unit,
            }),
            descriptors: self.children().iter().map(Descriptor::to_proto).collect(),
        }
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key(), self.value())
    }
}

// Serializes in the shape of an Envoy rate limit config file.
impl Serialize for Descriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Descriptor", 3)?;
        state.serialize_field("key", self.key())?;
        state.serialize_field("value", self.value())?;
        match self {
            Descriptor::Leaf { limit, .. } => state.serialize_field("rate_limit", limit)?,
            Descriptor::Branch { children, .. } => state.serialize_field("descriptors", children)?,
        }
        state.end()
    }
}
