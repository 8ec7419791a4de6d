//! Scene model: elements, inline binary files, and the serialized blob.
//!
//! DESIGN
//! ======
//! A scene element is a set of shared geometric fields plus a kind-specific
//! payload keyed on the JSON `type` field, flattened into the element, so
//! the persisted blob stays the flat record other clients write while merge
//! code can match on `ElementKind` exhaustively. Everything else a client
//! put on the element rides along in `extra`; a save never strips fields or
//! element types this client does not model.
//!
//! ERROR HANDLING
//! ==============
//! The blob comes from other clients and from older versions of this one.
//! Parsing never fails: an unparsable blob reads as an empty scene, and an
//! individual element without an `id` or `type`, or with a malformed known
//! field, is dropped. Both cases are logged with `warn!`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Identifier of an element, unique within one scene.
pub type ElementId = String;

/// Reference to a binary asset (image bytes) used by an element.
pub type FileId = String;

// =============================================================================
// ELEMENTS
// =============================================================================

/// Kind-specific payload of a scene element.
///
/// Serialized flat into the element: the `type` tag plus the kind's own
/// fields. Types this client does not draw itself stay as `Other` so they
/// survive a read and write-back.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Rectangle,
    Ellipse,
    Diamond,
    /// Polyline; points are relative to the element origin.
    Line { points: Vec<[f64; 2]> },
    Arrow { points: Vec<[f64; 2]> },
    /// Freehand stroke.
    Freedraw { points: Vec<[f64; 2]> },
    Text { text: String },
    /// Raster image backed by a binary asset.
    Image { file_id: Option<FileId> },
    /// Any other `type`; its payload lives in [`SceneElement::extra`].
    Other { type_name: String },
}

impl ElementKind {
    /// Value of the `type` field.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Diamond => "diamond",
            Self::Line { .. } => "line",
            Self::Arrow { .. } => "arrow",
            Self::Freedraw { .. } => "freedraw",
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Other { type_name } => type_name.as_str(),
        }
    }

    /// Remove the tag and the kind's own fields from a raw element record.
    fn take_from(fields: &mut Map<String, Value>) -> Result<Self, ElementError> {
        let type_name = match fields.remove("type") {
            Some(Value::String(name)) => name,
            _ => return Err(ElementError::MissingType),
        };
        Ok(match type_name.as_str() {
            "rectangle" => Self::Rectangle,
            "ellipse" => Self::Ellipse,
            "diamond" => Self::Diamond,
            "line" => Self::Line { points: take_field(fields, "points")? },
            "arrow" => Self::Arrow { points: take_field(fields, "points")? },
            "freedraw" => Self::Freedraw { points: take_field(fields, "points")? },
            "text" => Self::Text { text: take_field(fields, "text")? },
            "image" => Self::Image { file_id: take_field(fields, "fileId")? },
            _ => Self::Other { type_name },
        })
    }
}

impl Serialize for ElementKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            Self::Line { points } | Self::Arrow { points } | Self::Freedraw { points } => {
                map.serialize_entry("points", points)?;
            }
            Self::Text { text } => map.serialize_entry("text", text)?,
            Self::Image { file_id: Some(file_id) } => map.serialize_entry("fileId", file_id)?,
            Self::Rectangle | Self::Ellipse | Self::Diamond | Self::Image { file_id: None } | Self::Other { .. } => {}
        }
        map.end()
    }
}

#[derive(Debug, thiserror::Error)]
enum ElementError {
    #[error("element has no string `type`")]
    MissingType,
    #[error("invalid `{field}`: {source}")]
    Field {
        field: &'static str,
        source: serde_json::Error,
    },
}

fn take_field<T: DeserializeOwned + Default>(fields: &mut Map<String, Value>, field: &'static str) -> Result<T, ElementError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(raw) => serde_json::from_value(raw).map_err(|source| ElementError::Field { field, source }),
    }
}

/// One element of the scene graph.
///
/// Fields outside the modelled set (`strokeWidth`, `groupIds`, `isDeleted`,
/// ...) are kept in `extra` and written back as they were read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneElement {
    pub id: ElementId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in radians around the element center.
    pub angle: f64,
    /// Edit counter. Never decreases across writes any client has seen.
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(flatten)]
    pub kind: ElementKind,
    /// Unmodelled fields. Never holds `type` or the kind's own fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire shape of an element before the kind is split out.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementRecord {
    id: ElementId,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    angle: f64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    stroke_color: Option<String>,
    #[serde(default)]
    background_color: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl<'de> Deserialize<'de> for SceneElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = ElementRecord::deserialize(deserializer)?;
        let mut extra = record.rest;
        let kind = ElementKind::take_from(&mut extra).map_err(D::Error::custom)?;
        Ok(Self {
            id: record.id,
            x: record.x,
            y: record.y,
            width: record.width,
            height: record.height,
            angle: record.angle,
            version: record.version,
            stroke_color: record.stroke_color,
            background_color: record.background_color,
            kind,
            extra,
        })
    }
}

impl SceneElement {
    /// New element at version 1 with no styling.
    #[must_use]
    pub fn new(id: impl Into<ElementId>, kind: ElementKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            width,
            height,
            angle: 0.0,
            version: 1,
            stroke_color: None,
            background_color: None,
            kind,
            extra: Map::new(),
        }
    }

    /// Asset referenced by this element, if any.
    #[must_use]
    pub fn asset_ref(&self) -> Option<&FileId> {
        match &self.kind {
            ElementKind::Image { file_id } => file_id.as_ref(),
            ElementKind::Rectangle
            | ElementKind::Ellipse
            | ElementKind::Diamond
            | ElementKind::Line { .. }
            | ElementKind::Arrow { .. }
            | ElementKind::Freedraw { .. }
            | ElementKind::Text { .. }
            | ElementKind::Other { .. } => None,
        }
    }

    /// Right edge of the bounding box.
    #[must_use]
    pub fn right_edge(&self) -> f64 {
        self.x + self.width
    }
}

// =============================================================================
// FILES
// =============================================================================

/// Binary asset carried inline in the scene blob as a `data:` URL.
///
/// The payload is shared, so cloning a document does not copy image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFile {
    #[serde(rename = "dataURL")]
    pub data_url: Arc<str>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

// =============================================================================
// WRITE TAG
// =============================================================================

/// Origin stamp attached to every scene write.
///
/// A session that receives a snapshot carrying its own `session` id is
/// looking at the echo of its own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTag {
    pub session: Uuid,
    pub seq: u64,
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// Decoded scene blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    pub elements: Vec<SceneElement>,
    #[serde(default)]
    pub files: BTreeMap<FileId, BinaryFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<WriteTag>,
}

impl SceneDocument {
    /// Decode a persisted blob. Never fails; see module docs.
    ///
    /// Accepts `{ "elements": [...], "files": {...} }` and the bare element
    /// array written for freshly created boards.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "malformed scene blob; treating as empty");
                return Self::default();
            }
        };

        match value {
            Value::Array(items) => Self { elements: parse_elements(items), ..Self::default() },
            Value::Object(mut map) => {
                let elements = match map.remove("elements") {
                    Some(Value::Array(items)) => parse_elements(items),
                    _ => Vec::new(),
                };
                let files = match map.remove("files") {
                    Some(Value::Object(entries)) => parse_files(entries),
                    _ => BTreeMap::new(),
                };
                let origin = match map.remove("origin") {
                    Some(Value::Null) | None => None,
                    Some(raw_tag) => match serde_json::from_value::<WriteTag>(raw_tag) {
                        Ok(tag) => Some(tag),
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed scene origin tag");
                            None
                        }
                    },
                };
                Self { elements, files, origin }
            }
            _ => {
                warn!("scene blob is neither an object nor an array; treating as empty");
                Self::default()
            }
        }
    }

    /// Encode as the persisted blob.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if an element holds a non-finite float.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Look up an element by id.
    #[must_use]
    pub fn element(&self, id: &str) -> Option<&SceneElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Rightmost bounding-box edge across all elements, `0.0` when empty.
    #[must_use]
    pub fn max_right_edge(&self) -> f64 {
        self.elements
            .iter()
            .map(SceneElement::right_edge)
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Decode elements one by one, dropping the ones that fail and collapsing
/// duplicate ids to the highest version.
fn parse_elements(items: Vec<Value>) -> Vec<SceneElement> {
    let mut out: Vec<SceneElement> = Vec::with_capacity(items.len());
    let mut index: HashMap<ElementId, usize> = HashMap::new();

    for item in items {
        let element = match serde_json::from_value::<SceneElement>(item) {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, "dropping unreadable scene element");
                continue;
            }
        };
        match index.get(&element.id) {
            Some(&pos) => {
                if element.version >= out[pos].version {
                    out[pos] = element;
                }
            }
            None => {
                index.insert(element.id.clone(), out.len());
                out.push(element);
            }
        }
    }

    out
}

fn parse_files(entries: serde_json::Map<String, Value>) -> BTreeMap<FileId, BinaryFile> {
    let mut files = BTreeMap::new();
    for (id, raw) in entries {
        match serde_json::from_value::<BinaryFile>(raw) {
            Ok(file) => {
                files.insert(id, file);
            }
            Err(e) => warn!(file_id = %id, error = %e, "dropping unreadable scene file"),
        }
    }
    files
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
