//! Story generation: prompt, model call, and transactional persistence.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::builder::TreeBuilder;
use crate::error::{StoryError, StoryResult};
use crate::schema::StoryRecord;
use crate::store;
use crate::validate;

const STORY_PROMPT: &str = r#"You are a creative story writer that creates engaging choose-your-own-adventure stories.
Generate a complete branching story with multiple paths and endings in the JSON format described below.

The story should have:
1. A compelling title
2. A starting situation (root node) with 2-3 options
3. Each option should lead to another node with its own options
4. Some paths should lead to endings (both winning and losing)
5. At least one path should lead to a winning ending

Story structure requirements:
- Each node should have 2-3 options except for ending nodes
- The story should be 3-4 levels deep (including the root node)
- Vary the path lengths (some end earlier, some later)
- Make sure there is at least one winning path

Output your story in this exact JSON structure and nothing else:
{
  "title": "Story title",
  "rootNode": {
    "content": "The starting situation of the story",
    "isEnding": false,
    "isWinningEnding": false,
    "options": [
      {
        "text": "Option 1 text",
        "nextNode": {
          "content": "What happens for option 1",
          "isEnding": false,
          "isWinningEnding": false,
          "options": []
        }
      }
    ]
  }
}

Ending nodes have "isEnding": true and no options. Do not simplify or omit any part of the story structure."#;

/// The language model seen as a black box returning raw text.
#[async_trait]
pub trait StoryModel: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> StoryResult<String>;
}

/// Asks a [`StoryModel`] for a story.
pub struct StoryGenerator<'m> {
    model: &'m dyn StoryModel,
}

impl<'m> StoryGenerator<'m> {
    pub fn new(model: &'m dyn StoryModel) -> Self {
        Self { model }
    }

    /// Call the model for `theme` and return the raw `{title, rootNode}` object.
    pub async fn request_story(&self, theme: &str) -> StoryResult<Value> {
        info!("Requesting story for theme: {}", theme);
        let user_prompt = format!("Create the story with this theme: {}", theme);
        let response = self.model.generate(STORY_PROMPT, &user_prompt).await?;

        debug!("Raw model response length: {} chars", response.len());
        parse_model_json(&response)
    }
}

/// Write a raw model story for `session_id` through `conn`.
///
/// Run it inside a transaction. The story row is inserted before the tree is
/// validated, so an error leaves that row for the caller to roll back.
pub fn persist_story(conn: &Connection, session_id: &str, raw: &Value) -> StoryResult<StoryRecord> {
    let (title, root) = validate::split_story(raw)?;

    let story = store::insert_story(conn, &title, session_id)?;
    let mut builder = TreeBuilder::new(conn, story.id);
    builder.build(root)?;
    let node_count = builder.nodes_created();

    info!(
        "Saved story {} '{}' ({} nodes) for session {}",
        story.id, story.title, node_count, session_id
    );
    Ok(story)
}

/// Pull the JSON object out of a model reply, tolerating Markdown fences.
pub fn parse_model_json(response: &str) -> StoryResult<Value> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    if json_str.is_empty() {
        return Err(StoryError::ModelCall("empty response from model".to_string()));
    }

    serde_json::from_str(json_str).map_err(|e| {
        StoryError::ModelCall(format!(
            "invalid JSON from model ({}): {}",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })
}
