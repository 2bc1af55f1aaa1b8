//! Rebuilds the client-facing view of a story from its flat node rows.

use std::collections::BTreeMap;

use crate::error::{StoryError, StoryResult};
use crate::schema::{CompleteStoryView, NarrativeNode, NodeView, StoryRecord};
use crate::store::{self, Database};

/// Load a story with all of its nodes and assemble the client view.
pub async fn load_complete_story(db: &Database, story_id: i64) -> StoryResult<CompleteStoryView> {
    db.run(move |conn| {
        let story = store::get_story(conn, story_id)?
            .ok_or_else(|| StoryError::not_found("story", story_id))?;
        let nodes = store::list_story_nodes(conn, story_id)?;
        assemble(story, nodes)
    })
    .await
}

/// Index every node by id and pick out the roots.
///
/// `nodes` may arrive in any order. Roots are returned in ascending id order.
/// A story with no root node is corrupt and yields [`StoryError::MissingRoot`].
pub fn assemble(story: StoryRecord, nodes: Vec<NarrativeNode>) -> StoryResult<CompleteStoryView> {
    let mut root_ids = Vec::new();
    let mut all_nodes = BTreeMap::new();
    for node in nodes {
        if node.is_root {
            root_ids.push(node.id);
        }
        all_nodes.insert(node.id, NodeView::from(node));
    }

    if root_ids.is_empty() {
        return Err(StoryError::MissingRoot { story_id: story.id });
    }
    root_ids.sort_unstable();
    root_ids.dedup();

    let root_nodes = root_ids
        .iter()
        .filter_map(|id| all_nodes.get(id).cloned())
        .collect();

    Ok(CompleteStoryView {
        id: story.id,
        title: story.title,
        session_id: story.session_id,
        created_at: story.created_at,
        root_nodes,
        all_nodes,
    })
}
