//! Preview targets, size tiers and cache keys.
//!
//! # Cache Key
//!
//! Keys are built scene-first so that everything belonging to one scene
//! shares a common prefix:
//!
//! ```text
//! preview:{scene_id}:scene:{size}
//! preview:{scene_id}:slide:{slide_id}:{size}
//! preview:{scene_id}:page:{page_id}:{size}
//! preview:{scene_id}:node:{node_id}:{size}
//! ```
//!
//! Identifiers are percent-encoded, so separators (`:`) and wildcard
//! characters (`*`, `?`) inside an id can never be confused with key
//! structure or the patterns used by [`scene_pattern`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::render::fingerprint;

/// Common prefix of every preview cache key.
pub const KEY_PREFIX: &str = "preview";

// =============================================================================
// Target Kind
// =============================================================================

/// Identifies what to preview.
///
/// Equality is structural: two separately constructed values with the same
/// ids are the same target and share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// A whole scene
    Scene { scene_id: String },

    /// One slide of a card/slide scene
    Slide { scene_id: String, slide_id: String },

    /// One page of a document scene
    Page { scene_id: String, page_id: String },

    /// One node of a graph scene
    Node { scene_id: String, node_id: String },
}

impl TargetKind {
    /// The scene this target belongs to.
    pub fn scene_id(&self) -> &str {
        match self {
            TargetKind::Scene { scene_id }
            | TargetKind::Slide { scene_id, .. }
            | TargetKind::Page { scene_id, .. }
            | TargetKind::Node { scene_id, .. } => scene_id,
        }
    }

    /// The id of the item inside the scene, `None` for whole scenes.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            TargetKind::Scene { .. } => None,
            TargetKind::Slide { slide_id, .. } => Some(slide_id),
            TargetKind::Page { page_id, .. } => Some(page_id),
            TargetKind::Node { node_id, .. } => Some(node_id),
        }
    }

    /// The variant tag used for dispatch and key construction.
    pub fn tag(&self) -> TargetKindTag {
        match self {
            TargetKind::Scene { .. } => TargetKindTag::Scene,
            TargetKind::Slide { .. } => TargetKindTag::Slide,
            TargetKind::Page { .. } => TargetKindTag::Page,
            TargetKind::Node { .. } => TargetKindTag::Node,
        }
    }

    /// Build a target from a tag and ids.
    ///
    /// Returns `None` when `item_id` is missing for a non-scene tag.
    pub fn from_parts(
        tag: TargetKindTag,
        scene_id: impl Into<String>,
        item_id: Option<String>,
    ) -> Option<Self> {
        let scene_id = scene_id.into();
        match (tag, item_id) {
            (TargetKindTag::Scene, _) => Some(TargetKind::Scene { scene_id }),
            (TargetKindTag::Slide, Some(slide_id)) => Some(TargetKind::Slide { scene_id, slide_id }),
            (TargetKindTag::Page, Some(page_id)) => Some(TargetKind::Page { scene_id, page_id }),
            (TargetKindTag::Node, Some(node_id)) => Some(TargetKind::Node { scene_id, node_id }),
            (_, None) => None,
        }
    }

    /// Key for this target without the size suffix.
    pub fn key_prefix(&self) -> String {
        let scene = urlencoding::encode(self.scene_id());
        match self.item_id() {
            Some(item) => format!(
                "{}:{}:{}:{}",
                KEY_PREFIX,
                scene,
                self.tag(),
                urlencoding::encode(item)
            ),
            None => format!("{}:{}:{}", KEY_PREFIX, scene, self.tag()),
        }
    }

    /// Cache key for this target at the given size tier.
    pub fn cache_key(&self, size: SizeTier) -> String {
        format!("{}:{}", self.key_prefix(), size)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item_id() {
            Some(item) => write!(f, "{}:{}/{}", self.tag(), self.scene_id(), item),
            None => write!(f, "{}:{}", self.tag(), self.scene_id()),
        }
    }
}

/// Pattern matching every cache key that belongs to `scene_id`.
pub fn scene_pattern(scene_id: &str) -> String {
    format!("{}:{}:*", KEY_PREFIX, urlencoding::encode(scene_id))
}

/// Variant tag of a [`TargetKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKindTag {
    Scene,
    Slide,
    Page,
    Node,
}

impl TargetKindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKindTag::Scene => "scene",
            TargetKindTag::Slide => "slide",
            TargetKindTag::Page => "page",
            TargetKindTag::Node => "node",
        }
    }
}

impl fmt::Display for TargetKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKindTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene" => Ok(TargetKindTag::Scene),
            "slide" => Ok(TargetKindTag::Slide),
            "page" => Ok(TargetKindTag::Page),
            "node" => Ok(TargetKindTag::Node),
            other => Err(format!("unknown target kind: {}", other)),
        }
    }
}

// =============================================================================
// Preview Target
// =============================================================================

/// A target together with the caller's content revision.
///
/// The revision is not part of the target's identity or cache key. It only
/// feeds the staleness fingerprint: a cached preview generated at revision 3
/// is stale once the caller asks for revision 4. Callers that never bump
/// the revision must invalidate explicitly after edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewTarget {
    #[serde(flatten)]
    pub kind: TargetKind,

    #[serde(default)]
    pub revision: u64,
}

impl PreviewTarget {
    pub fn new(kind: TargetKind) -> Self {
        Self { kind, revision: 0 }
    }

    pub fn scene(scene_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Scene {
            scene_id: scene_id.into(),
        })
    }

    pub fn slide(scene_id: impl Into<String>, slide_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Slide {
            scene_id: scene_id.into(),
            slide_id: slide_id.into(),
        })
    }

    pub fn page(scene_id: impl Into<String>, page_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Page {
            scene_id: scene_id.into(),
            page_id: page_id.into(),
        })
    }

    pub fn node(scene_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Node {
            scene_id: scene_id.into(),
            node_id: node_id.into(),
        })
    }

    /// Set the content revision.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Cache key at the given size tier.
    pub fn cache_key(&self, size: SizeTier) -> String {
        self.kind.cache_key(size)
    }

    /// Staleness fingerprint over identity and revision.
    pub fn fingerprint(&self) -> String {
        let source = format!("{}#{}", self.kind.key_prefix(), self.revision);
        fingerprint(source.as_bytes())
    }
}

impl From<TargetKind> for PreviewTarget {
    fn from(kind: TargetKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for PreviewTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@r{}", self.kind, self.revision)
    }
}

// =============================================================================
// Size Tier
// =============================================================================

/// Output size preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Xs,
    Sm,
    Md,
}

impl SizeTier {
    /// Every tier, smallest first.
    pub const ALL: [SizeTier; 3] = [SizeTier::Xs, SizeTier::Sm, SizeTier::Md];

    /// `(width, height, jpeg_quality)` for this tier.
    const fn table(&self) -> (u32, u32, u8) {
        match self {
            SizeTier::Xs => (80, 60, 60),
            SizeTier::Sm => (160, 120, 75),
            SizeTier::Md => (320, 240, 85),
        }
    }

    pub const fn width(&self) -> u32 {
        self.table().0
    }

    pub const fn height(&self) -> u32 {
        self.table().1
    }

    /// Default JPEG quality for this tier.
    pub const fn quality(&self) -> u8 {
        self.table().2
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Xs => "xs",
            SizeTier::Sm => "sm",
            SizeTier::Md => "md",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xs" => Ok(SizeTier::Xs),
            "sm" => Ok(SizeTier::Sm),
            "md" => Ok(SizeTier::Md),
            other => Err(format!("unknown size tier: {}", other)),
        }
    }
}

// =============================================================================
// Priority & Options
// =============================================================================

/// Scheduling priority of a queued request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviewOptions {
    /// Override the default priority for this call
    pub priority: Option<Priority>,

    /// Override the tier's JPEG quality (clamped to 1-100)
    pub quality: Option<u8>,

    /// Ignore any cached entry and regenerate
    pub skip_cache: bool,

    /// Do not publish events for this call
    pub skip_events: bool,
}

impl PreviewOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn skip_events(mut self) -> Self {
        self.skip_events = true;
        self
    }

    /// Effective JPEG quality for the given tier.
    pub fn quality_for(&self, size: SizeTier) -> u8 {
        self.quality.unwrap_or(size.quality()).clamp(1, 100)
    }
}

// =============================================================================
// Tests
// =============================================================================
