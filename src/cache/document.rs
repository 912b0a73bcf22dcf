//! Documents, field paths and structural patches
//!
//! A [`Document`] is an ordered map from field name to JSON value. A
//! [`Patch`] is an ordered list of RFC 6902 style operations addressing
//! fields by JSON pointer. Documents can be diffed into patches and patches
//! applied either strictly ([`Document::apply`]) or leniently
//! ([`Document::merge`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::error::{DocumentError, DocumentResult};

/// Field holding the server-assigned identity
pub const ID_FIELD: &str = "id";

/// Field holding the server revision token
pub const REVISION_FIELD: &str = "revision";

/// Location of a field inside a document, in JSON pointer form (`/label`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    /// The document root (empty pointer)
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Path to a top-level field
    pub fn field(name: &str) -> Self {
        Self::root().child(name)
    }

    /// Path to a child of this path
    pub fn child(&self, name: &str) -> Self {
        let escaped = name.replace('~', "~0").replace('/', "~1");
        Self(format!("{}/{}", self.0, escaped))
    }

    /// Get the pointer string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unescaped pointer segments
    pub fn segments(&self) -> Vec<String> {
        if self.0.is_empty() {
            return Vec::new();
        }
        // A path without the leading slash is one bare field name
        let rest = self.0.strip_prefix('/').unwrap_or(&self.0);
        rest.split('/')
            .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
            .collect()
    }

    /// True when one path is a segment-wise prefix of the other.
    ///
    /// `/a` overlaps `/a/b`, `/a` does not overlap `/ab`.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        let mine = self.segments();
        let theirs = other.segments();
        let shared = mine.len().min(theirs.len());
        mine[..shared] == theirs[..shared]
    }
}

impl From<&str> for FieldPath {
    /// Strings starting with `/` are pointers; anything else names a
    /// top-level field.
    fn from(value: &str) -> Self {
        if value.is_empty() || value.starts_with('/') {
            Self(value.to_string())
        } else {
            Self::field(value)
        }
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(value: &FieldPath) -> Self {
        value.clone()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single field-level operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert (or overwrite) a value
    Add {
        /// Target path
        path: FieldPath,
        /// New value
        value: Value,
    },
    /// Overwrite an existing value
    Replace {
        /// Target path
        path: FieldPath,
        /// New value
        value: Value,
    },
    /// Delete an existing value
    Remove {
        /// Target path
        path: FieldPath,
    },
}

impl PatchOp {
    /// Path this operation targets
    pub fn path(&self) -> &FieldPath {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Replace { path, .. } | PatchOp::Remove { path } => {
                path
            }
        }
    }

    /// Operation name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Remove { .. } => "remove",
        }
    }
}

/// Ordered sequence of operations turning one document into another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from operations
    pub fn from_ops(ops: Vec<PatchOp>) -> Self {
        Self { ops }
    }

    /// Patch that lays every leaf of `snapshot` over a target document.
    ///
    /// Nested objects are descended so sibling fields of the target survive.
    pub fn snapshot(snapshot: &Document) -> Self {
        fn leaves(path: FieldPath, value: &Value, ops: &mut Vec<PatchOp>) {
            match value {
                Value::Object(map) if !map.is_empty() => {
                    for (key, child) in map {
                        leaves(path.child(key), child, ops);
                    }
                }
                _ => ops.push(PatchOp::Replace {
                    path,
                    value: value.clone(),
                }),
            }
        }

        let mut ops = Vec::new();
        for (key, value) in &snapshot.fields {
            leaves(FieldPath::field(key), value, &mut ops);
        }
        Self { ops }
    }

    /// Append an operation
    pub fn push(&mut self, op: PatchOp) {
        self.ops.push(op);
    }

    /// Append all operations of another patch
    pub fn extend(&mut self, other: Patch) {
        self.ops.extend(other.ops);
    }

    /// Operations in application order
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Consume into operations
    pub fn into_ops(self) -> Vec<PatchOp> {
        self.ops
    }

    /// Check if this patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Paths touched by this patch
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.ops.iter().map(PatchOp::path)
    }

    /// True if any path of `self` overlaps any path of `other`
    pub fn overlaps(&self, other: &Patch) -> bool {
        self.paths()
            .any(|mine| other.paths().any(|theirs| mine.overlaps(theirs)))
    }

    /// True if any path of this patch overlaps `path`
    pub fn touches(&self, path: &FieldPath) -> bool {
        self.paths().any(|mine| mine.overlaps(path))
    }
}

/// Ordered mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Document holding only an identity, as sent with `show`/`delete`
    pub fn with_id(id: &str) -> Self {
        let mut doc = Self::new();
        doc.set(ID_FIELD, Value::String(id.to_string()));
        doc
    }

    /// Builder-style field insert
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Look up a value by path
    pub fn get(&self, path: impl Into<FieldPath>) -> DocumentResult<&Value> {
        let path = path.into();
        let segments = path.segments();
        let Some((first, rest)) = segments.split_first() else {
            return Err(DocumentError::MissingField(path.to_string()));
        };

        let mut current = self
            .fields
            .get(first)
            .ok_or_else(|| DocumentError::MissingField(path.to_string()))?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| DocumentError::MissingField(path.to_string()))?;
        }
        Ok(current)
    }

    /// Check whether a path is present
    pub fn contains(&self, path: impl Into<FieldPath>) -> bool {
        self.get(path).is_ok()
    }

    /// Insert or overwrite a top-level field, returning the previous value
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.to_string(), value.into())
    }

    /// Remove a top-level field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Server identity, if known
    pub fn id(&self) -> Option<String> {
        self.fields.get(ID_FIELD).and_then(token)
    }

    /// Server revision, if known
    pub fn revision(&self) -> Option<String> {
        self.fields.get(REVISION_FIELD).and_then(token)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the document has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over top-level fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convert into a JSON object value
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Copy of this document with every given path removed.
    pub fn without_paths<'a>(&self, paths: impl IntoIterator<Item = &'a FieldPath>) -> Document {
        let mut root = Value::Object(self.fields.clone());
        for path in paths {
            let op = PatchOp::Remove { path: path.clone() };
            // Lenient removal cannot fail
            let _ = apply_op(&mut root, &op, false);
        }
        Document::from_root(root)
    }

    /// Compute the operations turning `from` into `to`.
    pub fn diff(from: &Document, to: &Document) -> Patch {
        let mut ops = Vec::new();
        diff_maps(&FieldPath::root(), &from.fields, &to.fields, &mut ops);
        Patch { ops }
    }

    /// Apply a patch strictly.
    ///
    /// Fails with [`DocumentError::InvalidPatch`] when `replace`/`remove`
    /// targets an absent path or `add` targets a path with an absent parent.
    pub fn apply(&self, patch: &Patch) -> DocumentResult<Document> {
        let mut root = Value::Object(self.fields.clone());
        for op in patch.ops() {
            apply_op(&mut root, op, true)?;
        }
        Ok(Document::from_root(root))
    }

    /// Apply a patch leniently: missing paths are created, removes of
    /// absent paths are ignored.
    pub fn merge(&self, patch: &Patch) -> Document {
        let mut root = Value::Object(self.fields.clone());
        for op in patch.ops() {
            if let Err(err) = apply_op(&mut root, op, false) {
                tracing::debug!(error = %err, "skipping unmergeable operation");
            }
        }
        Document::from_root(root)
    }

    fn from_root(root: Value) -> Document {
        match root {
            Value::Object(fields) => Document { fields },
            // Root is always an object; operations on the root are rejected
            _ => Document::new(),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Document {
    type Error = DocumentError;

    fn try_from(value: Value) -> DocumentResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DocumentError::NotAnObject(kind_of(&other).to_string())),
        }
    }
}

fn token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn diff_maps(base: &FieldPath, from: &Map<String, Value>, to: &Map<String, Value>, ops: &mut Vec<PatchOp>) {
    for (key, old) in from {
        let path = base.child(key);
        match to.get(key) {
            None => ops.push(PatchOp::Remove { path }),
            Some(new) if new == old => {}
            Some(Value::Object(new_map)) => match old {
                Value::Object(old_map) => diff_maps(&path, old_map, new_map, ops),
                _ => ops.push(PatchOp::Replace {
                    path,
                    value: Value::Object(new_map.clone()),
                }),
            },
            Some(new) => ops.push(PatchOp::Replace {
                path,
                value: new.clone(),
            }),
        }
    }
    for (key, new) in to {
        if !from.contains_key(key) {
            ops.push(PatchOp::Add {
                path: base.child(key),
                value: new.clone(),
            });
        }
    }
}

fn invalid(op: &PatchOp, detail: &str) -> DocumentError {
    DocumentError::InvalidPatch {
        op: op.name(),
        path: op.path().to_string(),
        detail: detail.to_string(),
    }
}

fn navigate<'a>(root: &'a mut Value, segments: &[String], create: bool) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => {
                if create {
                    map.entry(segment.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                } else {
                    map.get_mut(segment)?
                }
            }
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn apply_op(root: &mut Value, op: &PatchOp, strict: bool) -> DocumentResult<()> {
    let segments = op.path().segments();
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid(op, "cannot target the document root"));
    };
    let parent =
        navigate(root, parents, !strict).ok_or_else(|| invalid(op, "parent path does not exist"))?;

    match parent {
        Value::Object(map) => match op {
            PatchOp::Add { value, .. } => {
                map.insert(last.clone(), value.clone());
            }
            PatchOp::Replace { value, .. } => {
                if strict && !map.contains_key(last) {
                    return Err(invalid(op, "path does not exist"));
                }
                map.insert(last.clone(), value.clone());
            }
            PatchOp::Remove { .. } => {
                if map.remove(last).is_none() && strict {
                    return Err(invalid(op, "path does not exist"));
                }
            }
        },
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                last.parse::<usize>()
                    .map_err(|_| invalid(op, "array index is not a number"))?
            };
            match op {
                PatchOp::Add { value, .. } if index <= items.len() => items.insert(index, value.clone()),
                PatchOp::Replace { value, .. } if index < items.len() => items[index] = value.clone(),
                PatchOp::Remove { .. } if index < items.len() => {
                    items.remove(index);
                }
                PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } if !strict => {
                    items.push(value.clone())
                }
                PatchOp::Remove { .. } if !strict => {}
                _ => return Err(invalid(op, "array index out of bounds")),
            }
        }
        other => {
            return Err(invalid(
                op,
                &format!("parent is {}, not a container", kind_of(other)),
            ));
        }
    }
    Ok(())
}
