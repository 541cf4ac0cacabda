//! Core data model for the timeline canvas.
//!
//! The canvas is a forest of positioned nodes. Containment is expressed by
//! each node's `parent` reference (positions are parent-relative), and
//! visual connections between nodes are separate `Edge` rows. Behavior
//! decisions key off [`Behavior`]; the free-form `category` string only
//! drives display choices (icon, color).

use crate::id::{EdgeId, NodeId};
use serde::{Deserialize, Serialize};

// ─── Colors ──────────────────────────────────────────────────────────────

/// RGBA color. Stored as 4 × f32 [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Helper to parse a single hex digit.
fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RGB` or `#RRGGBB`. The leading `#` is optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let bytes = hex.as_bytes();
        let channel = |hi: u8, lo: u8| -> Option<f32> {
            Some((hex_val(hi)? << 4 | hex_val(lo)?) as f32 / 255.0)
        };

        match bytes.len() {
            3 => Some(Self::rgba(
                channel(bytes[0], bytes[0])?,
                channel(bytes[1], bytes[1])?,
                channel(bytes[2], bytes[2])?,
                1.0,
            )),
            6 => Some(Self::rgba(
                channel(bytes[0], bytes[1])?,
                channel(bytes[2], bytes[3])?,
                channel(bytes[4], bytes[5])?,
                1.0,
            )),
            _ => None,
        }
    }

    /// Emit as `#RRGGBB` (alpha is not persisted for edge colors).
    pub fn to_hex(&self) -> String {
        let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02X}{:02X}{:02X}", byte(self.r), byte(self.g), byte(self.b))
    }
}

// ─── Geometry ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, by: Point) -> Point {
        Point::new(self.x + by.x, self.y + by.y)
    }

    pub fn minus(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    /// True when either axis moved by more than `tolerance`.
    pub fn differs(self, other: Point, tolerance: f32) -> bool {
        (self.x - other.x).abs() > tolerance || (self.y - other.y).abs() > tolerance
    }

    /// True when both axes are strictly within `tolerance` of `other`.
    pub fn near(self, other: Point, tolerance: f32) -> bool {
        (self.x - other.x).abs() < tolerance && (self.y - other.y).abs() < tolerance
    }
}

/// Axis-aligned rectangle in some coordinate space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    /// Area of the intersection with `other`; zero when disjoint.
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    /// Fraction of `self` covered by `other`, in `[0, 1]`.
    ///
    /// Degenerate (zero-area) rectangles report 0.
    pub fn overlap_ratio(&self, other: &Rect) -> f32 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / area
    }
}

// ─── Nodes ───────────────────────────────────────────────────────────────

/// How a node treats its contents. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Terminal item, never a containment target.
    #[default]
    Leaf,
    /// Visual folder: contents render inline wherever the folder is visible.
    Group,
    /// Independent sub-canvas: contents only visible once navigated into.
    Portal,
}

impl Behavior {
    pub fn is_container(self) -> bool {
        !matches!(self, Behavior::Leaf)
    }

    /// Size given to freshly created nodes.
    pub fn default_size(self) -> (f32, f32) {
        match self {
            Behavior::Leaf => (320.0, 160.0),
            Behavior::Group | Behavior::Portal => (640.0, 480.0),
        }
    }
}

/// Reference to a row in another table whose display fields are mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedResource {
    pub table: String,
    pub id: String,
}

/// A positioned, sized item on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    /// Display tag (icon, color). Never consulted for behavior.
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub behavior: Behavior,
    /// Parent-relative position.
    pub position: Point,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub linked: Option<LinkedResource>,
}

impl Node {
    pub fn new(id: NodeId, behavior: Behavior) -> Self {
        let (width, height) = behavior.default_size();
        Self {
            id,
            title: String::new(),
            description: String::new(),
            content: String::new(),
            category: String::new(),
            behavior,
            position: Point::ORIGIN,
            width,
            height,
            z_index: 0,
            parent: None,
            space: None,
            linked: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.position = rect.origin();
        self.width = rect.width;
        self.height = rect.height;
        self
    }

    pub fn with_parent(mut self, parent: Option<NodeId>) -> Self {
        self.parent = parent;
        self
    }

    /// Parent-relative rectangle.
    pub fn rect(&self) -> Rect {
        Rect::new(self.position.x, self.position.y, self.width, self.height)
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            width: self.width,
            height: self.height,
            z_index: self.z_index,
        }
    }

    /// Apply a partial update in place.
    pub fn apply_patch(&mut self, patch: &NodePatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
        if let Some(content) = &patch.content {
            self.content.clone_from(content);
        }
        if let Some(category) = &patch.category {
            self.category.clone_from(category);
        }
        if let Some(parent) = patch.parent {
            self.parent = parent;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(z_index) = patch.z_index {
            self.z_index = z_index;
        }
    }
}

/// Fields for a node that does not exist yet; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    pub behavior: Behavior,
    pub position: Point,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub linked: Option<LinkedResource>,
}

impl NodeDraft {
    /// Draft with default size for the behavior, placed at `position`.
    pub fn new(title: impl Into<String>, behavior: Behavior, position: Point) -> Self {
        let (width, height) = behavior.default_size();
        Self {
            title: title.into(),
            description: String::new(),
            content: String::new(),
            category: String::new(),
            behavior,
            position,
            width,
            height,
            z_index: 0,
            parent: None,
            space: None,
            linked: None,
        }
    }

    /// Materialize under the given id.
    pub fn into_node(self, id: NodeId) -> Node {
        Node {
            id,
            title: self.title,
            description: self.description,
            content: self.content,
            category: self.category,
            behavior: self.behavior,
            position: self.position,
            width: self.width,
            height: self.height,
            z_index: self.z_index,
            parent: self.parent,
            space: self.space,
            linked: self.linked,
        }
    }
}

/// Partial node update. `parent: Some(None)` moves a node to the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Option<NodeId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
}

impl NodePatch {
    /// Patch carrying a full geometry snapshot of `node`.
    pub fn geometry_of(node: &Node) -> Self {
        Self {
            position: Some(node.position),
            width: Some(node.width),
            height: Some(node.height),
            ..Default::default()
        }
    }

    /// Patch carrying parent and geometry, as written by a reparent.
    pub fn placement_of(node: &Node) -> Self {
        Self {
            parent: Some(node.parent),
            ..Self::geometry_of(node)
        }
    }
}

/// One row of a batched geometry save.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub id: NodeId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub z_index: i32,
}

// ─── Edges (connections between nodes) ───────────────────────────────────

/// Side of a node an edge attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Top,
    #[default]
    Right,
    Bottom,
    Left,
}

/// A directed, styled connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Anchor,
    #[serde(default = "default_target_handle")]
    pub target_handle: Anchor,
    #[serde(default)]
    pub label: Option<String>,
    /// Persisted hex color; `None` renders with the default edge color.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

fn default_target_handle() -> Anchor {
    Anchor::Left
}

impl Edge {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId) -> Self {
        Self {
            id,
            source,
            target,
            source_handle: Anchor::Right,
            target_handle: Anchor::Left,
            label: None,
            color: None,
            animated: false,
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.source == node || self.target == node
    }

    pub fn apply_patch(&mut self, patch: &EdgePatch) {
        if let Some(label) = &patch.label {
            self.label.clone_from(label);
        }
        if let Some(color) = &patch.color {
            self.color.clone_from(color);
        }
        if let Some(animated) = patch.animated {
            self.animated = animated;
        }
    }
}

/// Fields for a new edge; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDraft {
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Anchor,
    pub target_handle: Anchor,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

impl EdgeDraft {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            source_handle: Anchor::Right,
            target_handle: Anchor::Left,
            label: None,
            color: None,
            animated: false,
        }
    }

    pub fn into_edge(self, id: EdgeId) -> Edge {
        Edge {
            id,
            source: self.source,
            target: self.target,
            source_handle: self.source_handle,
            target_handle: self.target_handle,
            label: self.label,
            color: self.color,
            animated: self.animated,
        }
    }
}

/// Partial edge update (label / color / animation edits).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
}
