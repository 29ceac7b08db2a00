//! Replicated table storage for the routing registry.
//!
//! Holds the cluster-replicated tables: trie nodes, trie edges, and topic
//! records. Mutations go through [`Store::transaction`], which serializes
//! writers behind a single write lock and rolls back on abort via an undo
//! log; the hot match path reads through [`Store::dirty`] without touching
//! the writer lock queue.
//!
//! The subscriber bag is deliberately absent here: it is node-local content
//! (see `registry`), while every table in this module is replicated to all
//! cluster members by the backing storage layer.

use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use parking_lot::RwLock;

/// One word of a topic filter.
pub type Word = CompactString;

/// Trie node key: the filter prefix traced from the root. Empty = root.
pub type NodeId = Vec<Word>;

/// Build a [`NodeId`] from borrowed words.
pub fn node_id(words: &[&str]) -> NodeId {
    words.iter().map(|w| Word::new(w)).collect()
}

/// A node in the replicated filter trie.
///
/// A node exists iff `edge_count > 0` or `topic` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieNode {
    /// Number of outgoing edges.
    pub edge_count: usize,
    /// Full filter string if a filter terminates exactly here.
    pub topic: Option<Arc<str>>,
}

/// The replicated tables. Only reachable through [`Store`].
#[derive(Debug, Default)]
pub struct Tables {
    trie_nodes: AHashMap<NodeId, TrieNode>,
    /// from-node -> word -> to-node (to-node is always `from ++ [word]`)
    trie_edges: AHashMap<NodeId, AHashMap<Word, NodeId>>,
    /// filter -> nodes hosting at least one subscriber for it
    topics: AHashMap<Arc<str>, AHashSet<Arc<str>>>,
}

impl Tables {
    pub fn trie_node(&self, id: &NodeId) -> Option<&TrieNode> {
        self.trie_nodes.get(id)
    }

    pub fn trie_edge(&self, from: &NodeId, word: &str) -> Option<&NodeId> {
        self.trie_edges.get(from)?.get(word)
    }

    /// Cluster nodes holding subscribers for `filter`.
    pub fn topic_nodes(&self, filter: &str) -> impl Iterator<Item = &Arc<str>> {
        self.topics.get(filter).into_iter().flatten()
    }

    pub fn has_topic(&self, filter: &str) -> bool {
        self.topics.get(filter).is_some_and(|n| !n.is_empty())
    }

    fn remove_edge(&mut self, from: &NodeId, word: &str) -> Option<NodeId> {
        let edges = self.trie_edges.get_mut(from)?;
        let prev = edges.remove(word);
        if edges.is_empty() {
            self.trie_edges.remove(from);
        }
        prev
    }

    /// Count of outgoing edge records for `id` (invariant checks in tests).
    pub fn edge_records(&self, id: &NodeId) -> usize {
        self.trie_edges.get(id).map_or(0, |e| e.len())
    }
}

enum Undo {
    TrieNode { id: NodeId, prev: Option<TrieNode> },
    TrieEdge { from: NodeId, word: Word, prev: Option<NodeId> },
    TopicNode { filter: Arc<str>, node: Arc<str>, was_present: bool },
}

/// A transaction over the replicated tables.
///
/// Writes are applied eagerly and recorded in an undo log; an abort replays
/// the log in reverse, restoring the pre-transaction state.
pub struct Txn<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl<'a> Txn<'a> {
    pub fn tables(&self) -> &Tables {
        self.tables
    }

    pub fn trie_node(&self, id: &NodeId) -> Option<TrieNode> {
        self.tables.trie_nodes.get(id).cloned()
    }

    pub fn trie_edge(&self, from: &NodeId, word: &str) -> Option<NodeId> {
        self.tables.trie_edge(from, word).cloned()
    }

    pub fn write_trie_node(&mut self, id: NodeId, node: TrieNode) {
        let prev = self.tables.trie_nodes.insert(id.clone(), node);
        self.undo.push(Undo::TrieNode { id, prev });
    }

    pub fn delete_trie_node(&mut self, id: &NodeId) {
        let prev = self.tables.trie_nodes.remove(id);
        self.undo.push(Undo::TrieNode { id: id.clone(), prev });
    }

    pub fn write_trie_edge(&mut self, from: NodeId, word: Word, to: NodeId) {
        let prev = self
            .tables
            .trie_edges
            .entry(from.clone())
            .or_default()
            .insert(word.clone(), to);
        self.undo.push(Undo::TrieEdge { from, word, prev });
    }

    pub fn delete_trie_edge(&mut self, from: &NodeId, word: &str) {
        let prev = self.tables.remove_edge(from, word);
        self.undo.push(Undo::TrieEdge {
            from: from.clone(),
            word: Word::new(word),
            prev,
        });
    }

    pub fn add_topic_node(&mut self, filter: &Arc<str>, node: &Arc<str>) {
        let newly_added = self
            .tables
            .topics
            .entry(filter.clone())
            .or_default()
            .insert(node.clone());
        self.undo.push(Undo::TopicNode {
            filter: filter.clone(),
            node: node.clone(),
            was_present: !newly_added,
        });
    }

    pub fn remove_topic_node(&mut self, filter: &str, node: &str) {
        let Some(nodes) = self.tables.topics.get_mut(filter) else {
            return;
        };
        let Some(node_key) = nodes.take(node) else {
            return;
        };
        if nodes.is_empty() {
            self.tables.topics.remove(filter);
        }
        self.undo.push(Undo::TopicNode {
            filter: Arc::from(filter),
            node: node_key,
            was_present: true,
        });
    }

    fn rollback(self) {
        for op in self.undo.into_iter().rev() {
            match op {
                Undo::TrieNode { id, prev } => match prev {
                    Some(node) => {
                        self.tables.trie_nodes.insert(id, node);
                    }
                    None => {
                        self.tables.trie_nodes.remove(&id);
                    }
                },
                Undo::TrieEdge { from, word, prev } => match prev {
                    Some(to) => {
                        self.tables
                            .trie_edges
                            .entry(from)
                            .or_default()
                            .insert(word, to);
                    }
                    None => {
                        self.tables.remove_edge(&from, &word);
                    }
                },
                Undo::TopicNode {
                    filter,
                    node,
                    was_present,
                } => {
                    if was_present {
                        self.tables
                            .topics
                            .entry(filter)
                            .or_default()
                            .insert(node);
                    } else if let Some(nodes) = self.tables.topics.get_mut(&filter) {
                        nodes.remove(&node);
                        if nodes.is_empty() {
                            self.tables.topics.remove(&filter);
                        }
                    }
                }
            }
        }
    }
}

/// Errors from the replicated store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transaction aborted; the reason is reported to the caller.
    Abort(String),
    /// A table invariant was found broken mid-transaction. Fatal.
    InvariantViolation(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Abort(reason) => write!(f, "transaction aborted: {}", reason),
            StoreError::InvariantViolation(detail) => {
                write!(f, "store invariant violation: {}", detail)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// This node's handle to the replicated tables.
#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` atomically. On `Err`, every write `f` made is undone.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Txn<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.write();
        let mut txn = Txn {
            tables: &mut *tables,
            undo: Vec::new(),
        };
        match f(&mut txn) {
            Ok(value) => Ok(value),
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Non-locking read (shared lock only); used on the match path.
    pub fn dirty<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read())
    }

    /// Drop all keys from every replicated table. Admin use only.
    pub fn reset(&self) {
        let mut tables = self.tables.write();
        tables.trie_nodes.clear();
        tables.trie_edges.clear();
        tables.topics.clear();
    }

    /// True when no replicated records remain.
    pub fn is_empty(&self) -> bool {
        let tables = self.tables.read();
        tables.trie_nodes.is_empty() && tables.trie_edges.is_empty() && tables.topics.is_empty()
    }
}
