//! Strict validation of model output into story drafts.
//!
//! Pure functions over `serde_json::Value`. Nothing is coerced: a field of the
//! wrong JSON type is rejected with the dotted path of the offending field.

use serde_json::{Map, Value};

use crate::error::{StoryError, StoryResult};
use crate::schema::{NodeDraft, OptionDraft};

/// Check the top-level `{title, rootNode}` envelope of a model response.
///
/// Returns the title and the still unvalidated root node.
pub fn split_story(value: &Value) -> StoryResult<(String, &Value)> {
    let obj = as_object(value, "$")?;
    let title = required_str(obj, "title", "")?;
    let root = obj
        .get("rootNode")
        .ok_or_else(|| StoryError::schema("rootNode", "missing required field"))?;
    Ok((title, root))
}

/// Validate a node and, unless it is an ending, every option beneath it.
///
/// `path` names the node in error messages (e.g. `rootNode.options[0].nextNode`).
/// Options on an ending must still be well-formed at their own level, but the
/// nodes they point to are not visited and the list is dropped.
pub fn parse_node(value: &Value, path: &str) -> StoryResult<NodeDraft> {
    let obj = as_object(value, path)?;
    let content = required_str(obj, "content", path)?;
    let is_ending = required_bool(obj, "isEnding", path)?;
    let is_winning_ending = required_bool(obj, "isWinningEnding", path)?;

    let options_path = join(path, "options");
    let raw_options = match obj.get("options") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(other) => {
            return Err(StoryError::schema(
                options_path,
                format!("expected array, got {}", type_name(other)),
            ))
        }
    };

    if is_ending {
        for (i, raw) in raw_options.iter().enumerate() {
            check_option_shape(raw, &format!("{}[{}]", options_path, i))?;
        }
        return Ok(NodeDraft {
            content,
            is_ending,
            is_winning_ending,
            options: Vec::new(),
        });
    }

    let mut options = Vec::with_capacity(raw_options.len());
    for (i, raw) in raw_options.iter().enumerate() {
        let option_path = format!("{}[{}]", options_path, i);
        options.push(parse_option(raw, &option_path)?);
    }

    Ok(NodeDraft {
        content,
        is_ending,
        is_winning_ending,
        options,
    })
}

fn parse_option(value: &Value, path: &str) -> StoryResult<OptionDraft> {
    let (text, next_value) = check_option_shape(value, path)?;
    let next_node = parse_node(next_value, &join(path, "nextNode"))?;
    Ok(OptionDraft { text, next_node })
}

/// `{text: string, nextNode: object}`, without looking inside `nextNode`.
fn check_option_shape<'a>(value: &'a Value, path: &str) -> StoryResult<(String, &'a Value)> {
    let obj = as_object(value, path)?;
    let text = required_str(obj, "text", path)?;
    let next_path = join(path, "nextNode");
    let next_value = obj
        .get("nextNode")
        .ok_or_else(|| StoryError::schema(&next_path, "missing required field"))?;
    as_object(next_value, &next_path)?;
    Ok((text, next_value))
}

// ============================================================================
// Field helpers
// ============================================================================

fn as_object<'a>(value: &'a Value, path: &str) -> StoryResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        StoryError::schema(path, format!("expected object, got {}", type_name(value)))
    })
}

fn required_str(obj: &Map<String, Value>, field: &str, path: &str) -> StoryResult<String> {
    let field_path = join(path, field);
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(StoryError::schema(
            field_path,
            format!("expected string, got {}", type_name(other)),
        )),
        None => Err(StoryError::schema(field_path, "missing required field")),
    }
}

fn required_bool(obj: &Map<String, Value>, field: &str, path: &str) -> StoryResult<bool> {
    let field_path = join(path, field);
    match obj.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(StoryError::schema(
            field_path,
            format!("expected boolean, got {}", type_name(other)),
        )),
        None => Err(StoryError::schema(field_path, "missing required field")),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
