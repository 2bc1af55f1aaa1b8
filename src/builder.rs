//! Flattens a nested story tree into persisted node rows.
//!
//! Post-order: every child is inserted (and has an id) before its parent's
//! option list is written, so options always point at existing rows.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoryResult;
use crate::schema::{NarrativeNode, NewNode, NodeDraft, NodeOption};
use crate::store::NodeStore;
use crate::validate;

/// Materializes one story's node tree through a [`NodeStore`].
///
/// The builder does not manage transactions. Callers run it inside one and
/// drop the transaction on error so a failed build leaves no rows behind.
pub struct TreeBuilder<'s, S: ?Sized> {
    store: &'s S,
    story_id: i64,
    nodes_created: usize,
}

impl<'s, S: NodeStore + ?Sized> TreeBuilder<'s, S> {
    pub fn new(store: &'s S, story_id: i64) -> Self {
        Self {
            store,
            story_id,
            nodes_created: 0,
        }
    }

    /// Validate a raw model node and persist the whole tree under it.
    ///
    /// Returns the persisted root, which is the only node flagged `is_root`.
    pub fn build(&mut self, raw_root: &Value) -> StoryResult<NarrativeNode> {
        let draft = validate::parse_node(raw_root, "rootNode")?;
        let node = self.materialize(&draft, true)?;
        info!(
            "Built story {}: {} nodes, root {}",
            self.story_id, self.nodes_created, node.id
        );
        Ok(node)
    }

    /// Number of rows inserted so far.
    pub fn nodes_created(&self) -> usize {
        self.nodes_created
    }

    fn materialize(&mut self, draft: &NodeDraft, is_root: bool) -> StoryResult<NarrativeNode> {
        let id = self.store.insert_node(NewNode {
            story_id: self.story_id,
            content: &draft.content,
            is_root,
            is_ending: draft.is_ending,
            is_winning_ending: draft.is_winning_ending,
        })?;
        self.nodes_created += 1;

        let mut node = NarrativeNode {
            id,
            story_id: self.story_id,
            content: draft.content.clone(),
            is_root,
            is_ending: draft.is_ending,
            is_winning_ending: draft.is_winning_ending,
            options: Vec::new(),
        };

        if node.is_ending {
            debug!("Node {} is an ending (winning: {})", id, node.is_winning_ending);
            return Ok(node);
        }

        let mut options = Vec::with_capacity(draft.options.len());
        for option in &draft.options {
            let child = self.materialize(&option.next_node, false)?;
            options.push(NodeOption {
                text: option.text.clone(),
                node_id: child.id,
            });
        }

        if !options.is_empty() {
            self.store.set_node_options(id, &options)?;
        }
        debug!("Node {} linked to {} children", id, options.len());
        node.options = options;
        Ok(node)
    }
}
