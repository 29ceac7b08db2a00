//! Replicated filter trie.
//!
//! The trie indexes topic filters by their word sequences. Each filter
//! contributes one `(prefix, word, prefix ++ [word])` triple per word; a
//! triple materializes as a trie edge plus `edge_count` bookkeeping on the
//! `from` node. Filters terminate in a node carrying the full filter string.
//!
//! Insertion and removal run inside a store transaction; matching runs on a
//! dirty read of the tables.

use std::sync::Arc;

use ahash::AHashSet;

use crate::store::{NodeId, StoreError, Tables, TrieNode, Txn, Word};
use crate::topic::{self, MULTI_WILDCARD, SINGLE_WILDCARD};

fn terminal_id(filter: &str) -> NodeId {
    topic::words(filter).iter().map(|w| Word::new(w)).collect()
}

/// Insert `filter` into the trie.
pub fn insert(tx: &mut Txn<'_>, filter: &Arc<str>) -> Result<(), StoreError> {
    let terminal = terminal_id(filter);

    if let Some(mut node) = tx.trie_node(&terminal) {
        // Already present as a terminal, or as an internal node to promote.
        if node.topic.is_none() {
            node.topic = Some(filter.clone());
            tx.write_trie_node(terminal, node);
        }
        return Ok(());
    }

    let mut prefix: NodeId = Vec::with_capacity(terminal.len());
    for word in &terminal {
        let from = prefix.clone();
        prefix.push(word.clone());

        if tx.trie_edge(&from, word).is_none() {
            match tx.trie_node(&from) {
                Some(mut node) => {
                    node.edge_count += 1;
                    tx.write_trie_node(from.clone(), node);
                }
                None => tx.write_trie_node(
                    from.clone(),
                    TrieNode {
                        edge_count: 1,
                        topic: None,
                    },
                ),
            }
            tx.write_trie_edge(from, word.clone(), prefix.clone());
        }
    }

    tx.write_trie_node(
        terminal,
        TrieNode {
            edge_count: 0,
            topic: Some(filter.clone()),
        },
    );
    Ok(())
}

/// Remove `filter` from the trie, pruning now-unused prefix nodes leaf-up.
///
/// Callers invoke this only once no topic records remain for the filter
/// anywhere in the cluster; a missing trie node at that point is corruption.
pub fn remove(tx: &mut Txn<'_>, filter: &str) -> Result<(), StoreError> {
    let terminal = terminal_id(filter);

    let Some(mut node) = tx.trie_node(&terminal) else {
        return Err(StoreError::InvariantViolation(format!(
            "trie node missing while removing filter '{}'",
            filter
        )));
    };

    if node.edge_count > 0 {
        // Other filters pass through here; it stays as an internal node.
        node.topic = None;
        tx.write_trie_node(terminal, node);
        return Ok(());
    }

    tx.delete_trie_node(&terminal);

    let mut current = terminal;
    while let Some(word) = current.last().cloned() {
        let from: NodeId = current[..current.len() - 1].to_vec();
        tx.delete_trie_edge(&from, &word);

        let Some(mut parent) = tx.trie_node(&from) else {
            return Err(StoreError::InvariantViolation(format!(
                "trie prefix node missing while pruning filter '{}'",
                filter
            )));
        };
        if parent.edge_count == 0 {
            return Err(StoreError::InvariantViolation(format!(
                "trie node edge_count underflow while pruning filter '{}'",
                filter
            )));
        }

        if parent.edge_count == 1 && parent.topic.is_none() {
            tx.delete_trie_node(&from);
            current = from;
            continue;
        }

        parent.edge_count -= 1;
        tx.write_trie_node(from, parent);
        break;
    }

    Ok(())
}

/// Match a routing key against the trie, returning the deduplicated set of
/// terminating filters.
///
/// The walk tries the literal next word and `+` at every step, and collects
/// any `#` leaf hanging off a visited node, since `#` absorbs the remainder
/// of the key (including zero words). The empty routing key is special: it
/// matches only `#` and the exact empty filter, never `+`.
pub fn match_filters(tables: &Tables, routing_key: &str) -> Vec<Arc<str>> {
    let words = topic::words(routing_key);
    let is_empty_key = routing_key.is_empty();
    let mut matched = AHashSet::new();
    let mut path: NodeId = Vec::with_capacity(words.len());
    walk(tables, &mut path, &words, is_empty_key, &mut matched);
    matched.into_iter().collect()
}

fn walk(
    tables: &Tables,
    node: &mut NodeId,
    rest: &[&str],
    is_empty_key: bool,
    out: &mut AHashSet<Arc<str>>,
) {
    if let Some(leaf) = tables.trie_edge(node, MULTI_WILDCARD) {
        // '#' is always a terminal node
        if let Some(topic) = tables.trie_node(leaf).and_then(|n| n.topic.as_ref()) {
            out.insert(topic.clone());
        }
    }

    let Some((word, rest)) = rest.split_first() else {
        if let Some(topic) = tables.trie_node(node).and_then(|n| n.topic.as_ref()) {
            out.insert(topic.clone());
        }
        return;
    };

    if tables.trie_edge(node, word).is_some() {
        node.push(Word::new(word));
        walk(tables, node, rest, is_empty_key, out);
        node.pop();
    }

    if !is_empty_key
        && *word != SINGLE_WILDCARD
        && tables.trie_edge(node, SINGLE_WILDCARD).is_some()
    {
        node.push(Word::new(SINGLE_WILDCARD));
        walk(tables, node, rest, is_empty_key, out);
        node.pop();
    }
}
