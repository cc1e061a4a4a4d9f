// Page service: the three capability interfaces over one meta.db.
//
// Each call takes the database mutex for the duration of a single store
// operation, releases it, then publishes the resulting event. Locks and
// content are separate capabilities; no content write looks at a lock.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use wikidoc_common::error::{CoreError, CoreResult};
use wikidoc_common::event::PageEvent;
use wikidoc_common::types::{
    Block, BlockComment, CommentNode, HistoryEntry, LockAcquisition, LockStatus, PageContent,
};

use crate::comments::{CommentStore, NewComment};
use crate::content::{
    restored_version_summary, updated_block_summary, ContentStore, DEFAULT_HISTORY_RETENTION,
};
use crate::events::{EventPublisher, NoopPublisher};
use crate::lock::{LockStore, DEFAULT_LEASE_SECS};
use crate::store::meta_db::MetaDb;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ── Capability interfaces ───────────────────────────────────────────

/// Versioned block content with bounded history.
pub trait ContentService: Send + Sync {
    fn create_content(&self, page_id: &str, blocks: Vec<Block>, actor: &str)
        -> CoreResult<PageContent>;

    fn get_content(&self, page_id: &str) -> CoreResult<PageContent>;

    fn replace_content(
        &self,
        page_id: &str,
        blocks: Vec<Block>,
        expected_version: i64,
        actor: &str,
        summary: Option<&str>,
    ) -> CoreResult<PageContent>;

    fn update_block(
        &self,
        page_id: &str,
        block_id: &str,
        block: Block,
        expected_version: i64,
        actor: &str,
    ) -> CoreResult<PageContent>;

    fn add_block(
        &self,
        page_id: &str,
        block: Block,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent>;

    fn delete_block(
        &self,
        page_id: &str,
        block_id: &str,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent>;

    fn history(&self, page_id: &str, limit: usize) -> CoreResult<Vec<HistoryEntry>>;

    fn version_snapshot(&self, page_id: &str, version: i64) -> CoreResult<HistoryEntry>;

    fn restore_version(
        &self,
        page_id: &str,
        target_version: i64,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent>;
}

/// Advisory edit leases. Holding one grants nothing in [`ContentService`].
pub trait LockService: Send + Sync {
    fn acquire_lock(&self, page_id: &str, actor: &str, session_id: &str)
        -> CoreResult<LockAcquisition>;

    fn release_lock(&self, page_id: &str, actor: &str, session_id: &str) -> CoreResult<bool>;

    fn lock_status(&self, page_id: &str) -> CoreResult<LockStatus>;

    fn sweep_locks(&self) -> CoreResult<usize>;
}

/// Block-anchored comment threads.
pub trait CommentService: Send + Sync {
    fn add_comment(&self, comment: NewComment) -> CoreResult<CommentNode>;

    fn page_comments(&self, page_id: &str) -> CoreResult<Vec<CommentNode>>;

    fn block_comments(&self, page_id: &str, block_id: &str) -> CoreResult<Vec<CommentNode>>;

    fn unresolved_comments(&self, page_id: &str) -> CoreResult<Vec<BlockComment>>;

    fn update_comment(&self, comment_id: &str, content: &str, actor: &str)
        -> CoreResult<BlockComment>;

    fn delete_comment(&self, comment_id: &str, actor: &str) -> CoreResult<()>;

    fn resolve_comment(&self, comment_id: &str, actor: &str) -> CoreResult<BlockComment>;

    fn unresolve_comment(&self, comment_id: &str) -> CoreResult<BlockComment>;

    fn mentions_for(&self, user_id: &str) -> CoreResult<Vec<BlockComment>>;
}

// ── SQLite-backed implementation ────────────────────────────────────

#[derive(Clone)]
pub struct PageService {
    db: Arc<Mutex<MetaDb>>,
    publisher: Arc<dyn EventPublisher>,
    clock: Clock,
    history_retention: usize,
    lease_secs: u64,
}

impl PageService {
    pub fn new(db: Arc<Mutex<MetaDb>>) -> Self {
        Self {
            db,
            publisher: Arc::new(NoopPublisher),
            clock: Arc::new(Utc::now),
            history_retention: DEFAULT_HISTORY_RETENTION,
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_history_retention(mut self, retention: usize) -> Self {
        self.history_retention = retention;
        self
    }

    pub fn with_lease_secs(mut self, lease_secs: u64) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    pub fn db(&self) -> Arc<Mutex<MetaDb>> {
        Arc::clone(&self.db)
    }

    pub fn clock(&self) -> Clock {
        Arc::clone(&self.clock)
    }

    /// Current time at the precision meta.db stores.
    fn now(&self) -> DateTime<Utc> {
        (self.clock)().trunc_subsecs(6)
    }

    fn with_storage<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        let db = self.db.lock().map_err(|_| CoreError::Storage(anyhow!("meta.db lock poisoned")))?;
        f(db.connection())
    }

    fn content<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(ContentStore<'_>) -> CoreResult<T>,
    {
        self.with_storage(|conn| f(ContentStore::with_retention(conn, self.history_retention)))
    }

    fn locks<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(LockStore<'_>) -> anyhow::Result<T>,
    {
        self.with_storage(|conn| Ok(f(LockStore::with_lease_secs(conn, self.lease_secs))?))
    }

    fn comments<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(CommentStore<'_>) -> CoreResult<T>,
    {
        self.with_storage(|conn| f(CommentStore::new(conn)))
    }

    fn emit(&self, event: PageEvent) {
        if let Err(error) = self.publisher.publish(&event) {
            warn!(page_id = event.page_id(), event = event.name(), ?error, "failed to publish event");
        }
    }

    fn content_updated(&self, content: &PageContent, summary: Option<String>) {
        self.emit(PageEvent::ContentUpdated {
            page_id: content.page_id.clone(),
            version: content.version,
            summary,
            actor: content.updated_by.clone(),
            at: content.updated_at,
        });
    }
}

impl ContentService for PageService {
    fn create_content(
        &self,
        page_id: &str,
        blocks: Vec<Block>,
        actor: &str,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let content = self.content(|store| store.create(page_id, blocks, actor, now))?;
        info!(page_id, actor, version = content.version, "page content created");

        self.emit(PageEvent::ContentCreated {
            page_id: content.page_id.clone(),
            version: content.version,
            actor: actor.to_string(),
            at: now,
        });
        Ok(content)
    }

    fn get_content(&self, page_id: &str) -> CoreResult<PageContent> {
        self.content(|store| store.get(page_id))
    }

    fn replace_content(
        &self,
        page_id: &str,
        blocks: Vec<Block>,
        expected_version: i64,
        actor: &str,
        summary: Option<&str>,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let content = self
            .content(|store| store.replace(page_id, blocks, expected_version, actor, summary, now))
            .inspect_err(|error| log_rejected(page_id, actor, expected_version, error))?;
        info!(page_id, actor, version = content.version, "page content replaced");

        self.content_updated(&content, summary.map(str::to_string));
        Ok(content)
    }

    fn update_block(
        &self,
        page_id: &str,
        block_id: &str,
        block: Block,
        expected_version: i64,
        actor: &str,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let content = self
            .content(|store| store.update_block(page_id, block_id, block, expected_version, actor, now))
            .inspect_err(|error| log_rejected(page_id, actor, expected_version, error))?;
        info!(page_id, actor, block_id, version = content.version, "block updated");

        self.content_updated(&content, Some(updated_block_summary(block_id)));
        Ok(content)
    }

    fn add_block(
        &self,
        page_id: &str,
        block: Block,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let block_id = block.id.clone();
        let content = self
            .content(|store| store.add_block(page_id, block, actor, expected_version, now))
            .inspect_err(|error| log_rejected(page_id, actor, expected_version, error))?;
        info!(page_id, actor, block_id = %block_id, version = content.version, "block added");

        self.emit(PageEvent::BlockAdded {
            page_id: content.page_id.clone(),
            block_id,
            version: content.version,
            actor: actor.to_string(),
            at: now,
        });
        Ok(content)
    }

    fn delete_block(
        &self,
        page_id: &str,
        block_id: &str,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let content = self
            .content(|store| store.delete_block(page_id, block_id, actor, expected_version, now))
            .inspect_err(|error| log_rejected(page_id, actor, expected_version, error))?;
        info!(page_id, actor, block_id, version = content.version, "block deleted");

        self.emit(PageEvent::BlockDeleted {
            page_id: content.page_id.clone(),
            block_id: block_id.to_string(),
            version: content.version,
            actor: actor.to_string(),
            at: now,
        });
        Ok(content)
    }

    fn history(&self, page_id: &str, limit: usize) -> CoreResult<Vec<HistoryEntry>> {
        self.content(|store| store.history(page_id, limit))
    }

    fn version_snapshot(&self, page_id: &str, version: i64) -> CoreResult<HistoryEntry> {
        self.content(|store| store.version_snapshot(page_id, version))
    }

    fn restore_version(
        &self,
        page_id: &str,
        target_version: i64,
        actor: &str,
        expected_version: i64,
    ) -> CoreResult<PageContent> {
        let now = self.now();
        let content = self
            .content(|store| {
                store.restore_version(page_id, target_version, actor, expected_version, now)
            })
            .inspect_err(|error| log_rejected(page_id, actor, expected_version, error))?;
        info!(page_id, actor, target_version, version = content.version, "version restored");

        self.content_updated(&content, Some(restored_version_summary(target_version)));
        Ok(content)
    }
}

impl LockService for PageService {
    fn acquire_lock(
        &self,
        page_id: &str,
        actor: &str,
        session_id: &str,
    ) -> CoreResult<LockAcquisition> {
        let now = self.now();
        self.locks(|store| store.acquire(page_id, actor, session_id, now))
    }

    fn release_lock(&self, page_id: &str, actor: &str, session_id: &str) -> CoreResult<bool> {
        self.locks(|store| store.release(page_id, actor, session_id))
    }

    fn lock_status(&self, page_id: &str) -> CoreResult<LockStatus> {
        let now = self.now();
        self.locks(|store| store.status(page_id, now))
    }

    fn sweep_locks(&self) -> CoreResult<usize> {
        let now = self.now();
        let removed = self.locks(|store| store.sweep(now))?;
        if removed > 0 {
            debug!(removed, "expired locks swept");
        }
        Ok(removed)
    }
}

impl CommentService for PageService {
    fn add_comment(&self, comment: NewComment) -> CoreResult<CommentNode> {
        let now = self.now();
        let node = self.comments(|store| store.add(comment, now))?;
        let added = &node.comment;
        info!(
            page_id = %added.page_id,
            block_id = %added.block_id,
            comment_id = %added.id,
            actor = %added.created_by,
            "comment added"
        );

        self.emit(PageEvent::CommentAdded {
            page_id: added.page_id.clone(),
            block_id: added.block_id.clone(),
            comment_id: added.id.clone(),
            parent_id: added.parent_id.clone(),
            mentions: added.mentions.clone(),
            actor: added.created_by.clone(),
            at: now,
        });
        Ok(node)
    }

    fn page_comments(&self, page_id: &str) -> CoreResult<Vec<CommentNode>> {
        self.comments(|store| store.page_threads(page_id))
    }

    fn block_comments(&self, page_id: &str, block_id: &str) -> CoreResult<Vec<CommentNode>> {
        self.comments(|store| store.block_threads(page_id, block_id))
    }

    fn unresolved_comments(&self, page_id: &str) -> CoreResult<Vec<BlockComment>> {
        self.comments(|store| store.unresolved(page_id))
    }

    fn update_comment(
        &self,
        comment_id: &str,
        content: &str,
        actor: &str,
    ) -> CoreResult<BlockComment> {
        let now = self.now();
        self.comments(|store| store.update(comment_id, content, actor, now))
    }

    fn delete_comment(&self, comment_id: &str, actor: &str) -> CoreResult<()> {
        self.comments(|store| store.delete(comment_id, actor))?;
        info!(comment_id, actor, "comment deleted");
        Ok(())
    }

    fn resolve_comment(&self, comment_id: &str, actor: &str) -> CoreResult<BlockComment> {
        let now = self.now();
        self.comments(|store| store.resolve(comment_id, actor, now))
    }

    fn unresolve_comment(&self, comment_id: &str) -> CoreResult<BlockComment> {
        self.comments(|store| store.unresolve(comment_id))
    }

    fn mentions_for(&self, user_id: &str) -> CoreResult<Vec<BlockComment>> {
        self.comments(|store| store.mentioning(user_id))
    }
}

fn log_rejected(page_id: &str, actor: &str, expected_version: i64, error: &CoreError) {
    if let Some(current) = error.current_version() {
        debug!(page_id, actor, expected_version, current, "stale write rejected");
    }
}
