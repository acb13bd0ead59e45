//! Knowledge graph edges
//!
//! Directed, typed, weighted relationships between items. Self-referential
//! edges are storable but traversal never follows them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of relationship between knowledge items
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Semantically related (similar meaning/topic)
    Semantic,
    /// Temporal relationship (happened before/after)
    Temporal,
    /// Causal relationship (A caused B)
    Causal,
    /// Derived knowledge (B is derived from A)
    Derived,
    /// Contradiction (A and B conflict)
    Contradiction,
    /// Refinement (B is a more specific version of A)
    Refinement,
    /// User-defined relationship
    Custom,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Semantic => "semantic",
            EdgeType::Temporal => "temporal",
            EdgeType::Causal => "causal",
            EdgeType::Derived => "derived",
            EdgeType::Contradiction => "contradiction",
            EdgeType::Refinement => "refinement",
            EdgeType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(EdgeType::Semantic),
            "temporal" => Ok(EdgeType::Temporal),
            "causal" => Ok(EdgeType::Causal),
            "derived" => Ok(EdgeType::Derived),
            "contradiction" => Ok(EdgeType::Contradiction),
            "refinement" => Ok(EdgeType::Refinement),
            "custom" => Ok(EdgeType::Custom),
            _ => Err(format!("Unknown edge type: {}", s)),
        }
    }
}

/// A directed edge in the knowledge graph.
///
/// Unique per `(tenant_id, from_id, to_id, edge_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEdge {
    /// Unique edge id
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Source item id
    pub from_id: String,
    /// Target item id
    pub to_id: String,
    /// Type of relationship
    pub edge_type: EdgeType,
    /// Strength of the relationship, [0, 1]
    pub weight: f64,
    /// Edge-specific metadata
    pub metadata: Option<serde_json::Value>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEdge {
    /// Create a new edge with full weight.
    pub fn new(
        tenant_id: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        edge_type: EdgeType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            edge_type,
            weight: 1.0,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// True when the edge points back at its own source.
    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }
}
