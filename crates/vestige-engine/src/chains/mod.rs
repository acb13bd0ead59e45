//! Memory chains
//!
//! Ordered sequences of item ids with typed links between consecutive
//! members, for reasoning paths, processes, and narratives. Owned storage in
//! a single manager per tenant: components ask the manager for operations
//! rather than sharing mutable chain references.
//!
//! Invariants held after every operation:
//! - every link endpoint is a chain member
//! - no duplicate members
//! - `head_id` is the first member, `tail_id` the last

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ============================================================================
// TYPES
// ============================================================================

/// What kind of sequence a chain models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    /// Events in time order
    Temporal,
    /// Cause leading to effect
    Causal,
    /// A learning progression
    Learning,
    /// Steps of a procedure
    Process,
    /// Problem, attempts, resolution
    ProblemSolving,
    /// Loosely themed collection
    Thematic,
}

/// How two consecutive members relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainLinkType {
    /// Simple succession (the default used when rewiring)
    #[default]
    Sequential,
    /// Source caused target
    Causal,
    /// Target elaborates on source
    Elaboration,
    /// Target contrasts with source
    Contrast,
    /// Target supports/evidences source
    Supportive,
}

/// A typed link between two chain members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    pub source_id: String,
    pub target_id: String,
    pub link_type: ChainLinkType,
}

/// An ordered chain of memory ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryChain {
    pub id: String,
    pub name: String,
    pub chain_type: ChainType,
    pub item_ids: Vec<String>,
    pub links: Vec<ChainLink>,
    pub head_id: Option<String>,
    pub tail_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryChain {
    fn new(name: String, chain_type: ChainType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            chain_type,
            item_ids: Vec::new(),
            links: Vec::new(),
            head_id: None,
            tail_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// True when the chain has no members.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    fn refresh_endpoints(&mut self) {
        self.head_id = self.item_ids.first().cloned();
        self.tail_id = self.item_ids.last().cloned();
        self.updated_at = Utc::now();
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.item_ids.iter().position(|id| id == item_id)
    }
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraverseDirection {
    Forward,
    Backward,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Owns all chains for one tenant, with a reverse index from item to the
/// chains containing it.
#[derive(Debug, Default)]
pub struct ChainManager {
    chains: HashMap<String, MemoryChain>,
    item_index: HashMap<String, HashSet<String>>,
}

impl ChainManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty chain, returning its id.
    pub fn create(&mut self, name: impl Into<String>, chain_type: ChainType) -> String {
        let chain = MemoryChain::new(name.into(), chain_type);
        let id = chain.id.clone();
        self.chains.insert(id.clone(), chain);
        id
    }

    /// Look up a chain.
    pub fn get(&self, chain_id: &str) -> Option<&MemoryChain> {
        self.chains.get(chain_id)
    }

    /// Append an item, or insert it right after `after_id`.
    pub fn add(
        &mut self,
        chain_id: &str,
        item_id: impl Into<String>,
        after_id: Option<&str>,
        link_type: ChainLinkType,
    ) -> Result<()> {
        let item_id = item_id.into();
        let chain = self.chain_mut(chain_id)?;
        if chain.position(&item_id).is_some() {
            return Err(EngineError::validation(
                "item_id",
                format!("{} is already in chain {}", item_id, chain_id),
            ));
        }

        match after_id {
            None => {
                if let Some(tail) = chain.tail_id.clone() {
                    chain.links.push(ChainLink {
                        source_id: tail,
                        target_id: item_id.clone(),
                        link_type,
                    });
                }
                chain.item_ids.push(item_id.clone());
            }
            Some(after) => {
                let pos = chain
                    .position(after)
                    .ok_or_else(|| EngineError::NotFound(after.to_string()))?;
                let successor = chain.item_ids.get(pos + 1).cloned();
                chain.item_ids.insert(pos + 1, item_id.clone());
                // Rewire: after -> new (typed), new -> old successor
                if let Some(successor) = successor {
                    chain
                        .links
                        .retain(|l| !(l.source_id == after && l.target_id == successor));
                    chain.links.push(ChainLink {
                        source_id: item_id.clone(),
                        target_id: successor,
                        link_type: ChainLinkType::default(),
                    });
                }
                chain.links.push(ChainLink {
                    source_id: after.to_string(),
                    target_id: item_id.clone(),
                    link_type,
                });
            }
        }
        chain.refresh_endpoints();
        self.index_item(&item_id, chain_id);
        Ok(())
    }

    /// Insert an item at the front.
    pub fn prepend(
        &mut self,
        chain_id: &str,
        item_id: impl Into<String>,
        link_type: ChainLinkType,
    ) -> Result<()> {
        let item_id = item_id.into();
        let chain = self.chain_mut(chain_id)?;
        if chain.position(&item_id).is_some() {
            return Err(EngineError::validation(
                "item_id",
                format!("{} is already in chain {}", item_id, chain_id),
            ));
        }
        if let Some(head) = chain.head_id.clone() {
            chain.links.push(ChainLink {
                source_id: item_id.clone(),
                target_id: head,
                link_type,
            });
        }
        chain.item_ids.insert(0, item_id.clone());
        chain.refresh_endpoints();
        self.index_item(&item_id, chain_id);
        Ok(())
    }

    /// Remove an item, rewiring its neighbors with the default link type.
    pub fn remove(&mut self, chain_id: &str, item_id: &str) -> Result<bool> {
        let chain = self.chain_mut(chain_id)?;
        let Some(pos) = chain.position(item_id) else {
            return Ok(false);
        };

        let predecessor = pos.checked_sub(1).map(|p| chain.item_ids[p].clone());
        let successor = chain.item_ids.get(pos + 1).cloned();

        chain.item_ids.remove(pos);
        chain
            .links
            .retain(|l| l.source_id != item_id && l.target_id != item_id);
        if let (Some(before), Some(after)) = (predecessor, successor) {
            chain.links.push(ChainLink {
                source_id: before,
                target_id: after,
                link_type: ChainLinkType::default(),
            });
        }
        chain.refresh_endpoints();

        if let Some(set) = self.item_index.get_mut(item_id) {
            set.remove(chain_id);
            if set.is_empty() {
                self.item_index.remove(item_id);
            }
        }
        Ok(true)
    }

    /// Walk up to `limit` members from `start` in the given direction,
    /// inclusive of the start.
    pub fn traverse(
        &self,
        chain_id: &str,
        start_id: &str,
        direction: TraverseDirection,
        limit: usize,
    ) -> Result<Vec<String>> {
        let chain = self.chain(chain_id)?;
        let pos = chain
            .position(start_id)
            .ok_or_else(|| EngineError::NotFound(start_id.to_string()))?;

        let ids = match direction {
            TraverseDirection::Forward => chain.item_ids[pos..]
                .iter()
                .take(limit)
                .cloned()
                .collect(),
            TraverseDirection::Backward => chain.item_ids[..=pos]
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(ids)
    }

    /// The member after `item_id`, if any.
    pub fn next(&self, chain_id: &str, item_id: &str) -> Result<Option<String>> {
        let chain = self.chain(chain_id)?;
        Ok(chain
            .position(item_id)
            .and_then(|pos| chain.item_ids.get(pos + 1))
            .cloned())
    }

    /// The member before `item_id`, if any.
    pub fn previous(&self, chain_id: &str, item_id: &str) -> Result<Option<String>> {
        let chain = self.chain(chain_id)?;
        Ok(chain
            .position(item_id)
            .and_then(|pos| pos.checked_sub(1))
            .and_then(|pos| chain.item_ids.get(pos))
            .cloned())
    }

    /// Number of members in a chain.
    pub fn length(&self, chain_id: &str) -> Result<usize> {
        Ok(self.chain(chain_id)?.len())
    }

    /// Merge chain `b` into chain `a` (appending or prepending) and delete
    /// `b`. Fails if the chains share members.
    pub fn merge(&mut self, a_id: &str, b_id: &str, append: bool) -> Result<()> {
        if a_id == b_id {
            return Err(EngineError::validation("chain_id", "cannot merge a chain with itself"));
        }
        self.chain(a_id)?;
        let b = self
            .chains
            .remove(b_id)
            .ok_or_else(|| EngineError::NotFound(b_id.to_string()))?;
        let a = self.chains.get_mut(a_id).expect("checked above");

        let a_members: HashSet<&String> = a.item_ids.iter().collect();
        if b.item_ids.iter().any(|id| a_members.contains(id)) {
            let b_restored = b;
            let b_id = b_restored.id.clone();
            self.chains.insert(b_id, b_restored);
            return Err(EngineError::validation(
                "chain_id",
                "chains share members; merge would duplicate",
            ));
        }

        if append {
            if let (Some(tail), Some(head)) = (a.tail_id.clone(), b.head_id.clone()) {
                a.links.push(ChainLink {
                    source_id: tail,
                    target_id: head,
                    link_type: ChainLinkType::default(),
                });
            }
            a.item_ids.extend(b.item_ids.iter().cloned());
        } else {
            if let (Some(tail), Some(head)) = (b.tail_id.clone(), a.head_id.clone()) {
                a.links.push(ChainLink {
                    source_id: tail,
                    target_id: head,
                    link_type: ChainLinkType::default(),
                });
            }
            let mut merged = b.item_ids.clone();
            merged.extend(a.item_ids.iter().cloned());
            a.item_ids = merged;
        }
        a.links.extend(b.links.iter().cloned());
        a.refresh_endpoints();

        let a_id = a.id.clone();
        for item_id in &b.item_ids {
            if let Some(set) = self.item_index.get_mut(item_id) {
                set.remove(b_id);
            }
            self.index_item(item_id, &a_id);
        }
        Ok(())
    }

    /// Split a chain at `item_id`: the original keeps the prefix, the new
    /// chain starts at `item_id`. Returns the new chain's id.
    pub fn split(&mut self, chain_id: &str, item_id: &str) -> Result<String> {
        let chain = self.chain_mut(chain_id)?;
        let pos = chain
            .position(item_id)
            .ok_or_else(|| EngineError::NotFound(item_id.to_string()))?;
        if pos == 0 {
            return Err(EngineError::validation(
                "item_id",
                "cannot split at the head; the prefix would be empty",
            ));
        }

        let moved: Vec<String> = chain.item_ids.split_off(pos);
        let moved_set: HashSet<&String> = moved.iter().collect();
        let (kept_links, moved_links): (Vec<ChainLink>, Vec<ChainLink>) = chain
            .links
            .drain(..)
            .partition(|l| !moved_set.contains(&l.source_id) && !moved_set.contains(&l.target_id));
        // Links crossing the boundary are dropped
        let moved_links: Vec<ChainLink> = moved_links
            .into_iter()
            .filter(|l| moved_set.contains(&l.source_id) && moved_set.contains(&l.target_id))
            .collect();
        chain.links = kept_links;
        chain.refresh_endpoints();

        let name = format!("{} (split)", chain.name);
        let chain_type = chain.chain_type;
        let mut new_chain = MemoryChain::new(name, chain_type);
        new_chain.item_ids = moved;
        new_chain.links = moved_links;
        new_chain.refresh_endpoints();
        let new_id = new_chain.id.clone();

        for item_id in &new_chain.item_ids {
            if let Some(set) = self.item_index.get_mut(item_id) {
                set.remove(chain_id);
            }
            self.index_item(item_id, &new_id);
        }
        self.chains.insert(new_id.clone(), new_chain);
        Ok(new_id)
    }

    /// Delete a chain entirely.
    pub fn delete(&mut self, chain_id: &str) -> Result<bool> {
        let Some(chain) = self.chains.remove(chain_id) else {
            return Ok(false);
        };
        for item_id in &chain.item_ids {
            if let Some(set) = self.item_index.get_mut(item_id) {
                set.remove(chain_id);
                if set.is_empty() {
                    self.item_index.remove(item_id);
                }
            }
        }
        Ok(true)
    }

    /// Chains containing an item, via the reverse index.
    pub fn get_chains_for_item(&self, item_id: &str) -> Vec<&MemoryChain> {
        self.item_index
            .get(item_id)
            .map(|chain_ids| {
                let mut chains: Vec<&MemoryChain> = chain_ids
                    .iter()
                    .filter_map(|id| self.chains.get(id))
                    .collect();
                chains.sort_by(|a, b| a.id.cmp(&b.id));
                chains
            })
            .unwrap_or_default()
    }

    /// Render a chain as a readable path.
    pub fn describe(&self, chain_id: &str) -> Result<String> {
        let chain = self.chain(chain_id)?;
        Ok(format!(
            "{} [{}]: {}",
            chain.name,
            chain.len(),
            chain.item_ids.join(" -> ")
        ))
    }

    fn chain(&self, chain_id: &str) -> Result<&MemoryChain> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| EngineError::NotFound(chain_id.to_string()))
    }

    fn chain_mut(&mut self, chain_id: &str) -> Result<&mut MemoryChain> {
        self.chains
            .get_mut(chain_id)
            .ok_or_else(|| EngineError::NotFound(chain_id.to_string()))
    }

    fn index_item(&mut self, item_id: &str, chain_id: &str) {
        self.item_index
            .entry(item_id.to_string())
            .or_default()
            .insert(chain_id.to_string());
    }
}

// ============================================================================
// TESTS
// ============================================================================
