use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty datastore path")]
    Empty,
    #[error("datastore path {0:?} must start with '/'")]
    NotAbsolute(String),
    #[error("datastore path {0:?} crosses a non-object value")]
    NotAnObject(String),
}

/// Escapes one path segment so that `/` and `~` inside keys survive.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Joins already-escaped `parent` with a raw key.
pub fn child(parent: &str, key: &str) -> String {
    format!("{parent}/{}", escape_segment(key))
}

pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    doc.pointer(path)
}

/// Writes `value` at `path`, creating intermediate objects. Returns whether
/// the stored value changed.
pub fn assign(doc: &mut Value, path: &str, value: Value) -> Result<bool, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PathError::NotAbsolute(path.to_string()));
    };

    let segments: Vec<String> = rest.split('/').map(unescape_segment).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::Empty);
    };

    let mut cur = doc;
    for segment in parents {
        if cur.is_null() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(map) = cur else {
            return Err(PathError::NotAnObject(path.to_string()));
        };
        cur = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if cur.is_null() {
        *cur = Value::Object(Map::new());
    }
    let Value::Object(map) = cur else {
        return Err(PathError::NotAnObject(path.to_string()));
    };

    if map.get(last) == Some(&value) {
        return Ok(false);
    }
    map.insert(last.clone(), value);
    Ok(true)
}
