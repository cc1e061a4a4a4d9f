// Core domain types shared by the content store, lock manager and comment layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Content ─────────────────────────────────────────────────────────

/// A node in a page's content tree.
///
/// Block ids are assigned by the caller and must be unique across the whole
/// page, not just among siblings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub id: String,
    /// Rendering tag (`paragraph`, `heading`, ...). Opaque to the core.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { id: id.into(), kind: kind.into(), payload: Value::Null, children: Vec::new() }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }
}

/// The live content of one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageContent {
    pub page_id: String,
    pub blocks: Vec<Block>,
    pub version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// What kind of mutation produced a history row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Create,
    Update,
    BlockAdd,
    BlockDelete,
    Restore,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::BlockAdd => "block-add",
            Self::BlockDelete => "block-delete",
            Self::Restore => "restore",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "block-add" => Some(Self::BlockAdd),
            "block-delete" => Some(Self::BlockDelete),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

/// Immutable full snapshot of a page taken after an accepted mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub page_id: String,
    pub blocks: Vec<Block>,
    /// Version *after* the mutation that produced this snapshot.
    pub version: i64,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub change_type: ChangeType,
    pub change_summary: Option<String>,
}

// ── Locks ───────────────────────────────────────────────────────────

/// An advisory single-owner edit lease on a page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentLock {
    pub page_id: String,
    pub locked_by: String,
    pub session_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ContentLock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, actor: &str, session_id: &str) -> bool {
        self.locked_by == actor && self.session_id == session_id
    }
}

/// Outcome of an acquire call. Never an error: callers branch on `owned`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockAcquisition {
    pub acquired: bool,
    /// True when the caller's `(actor, session)` holds the live lock.
    pub owned: bool,
    /// The live lock: the caller's on success, the incumbent's otherwise.
    pub lock: ContentLock,
}

/// Read-only view of a page's lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Unlocked,
    Locked { lock: ContentLock },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

// ── Comments ────────────────────────────────────────────────────────

/// A single comment anchored to a block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockComment {
    pub id: String,
    pub page_id: String,
    pub block_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

impl BlockComment {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A comment together with its nested replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: BlockComment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn leaf(comment: BlockComment) -> Self {
        Self { comment, replies: Vec::new() }
    }

    /// Number of comments in this subtree, including the root.
    pub fn count(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::count).sum::<usize>()
    }
}

/// A user mentioned by a comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentMention {
    pub comment_id: String,
    pub mentioned_user_id: String,
    pub created_at: DateTime<Utc>,
}
