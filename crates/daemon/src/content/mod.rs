// Versioned page content with a bounded snapshot history.
//
// Every mutation runs in one transaction:
//   load live row → compare expected version → apply to the block tree
//   → conditional UPDATE (… AND version = expected) → append history
//   → prune history beyond the retention cap.
//
// The conditional UPDATE is the compare-and-swap. Nothing is merged; a
// rejected write leaves content and history untouched and reports the
// live version so the caller can refetch and retry.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use wikidoc_common::error::{CoreError, CoreResult, Resource};
use wikidoc_common::tree::BlockTree;
use wikidoc_common::types::{Block, ChangeType, HistoryEntry, PageContent};

use crate::store::{decode_json, encode_json, format_timestamp, parse_timestamp};

pub const DEFAULT_HISTORY_RETENTION: usize = 50;

pub(crate) fn updated_block_summary(block_id: &str) -> String {
    format!("updated block {block_id}")
}

pub(crate) fn restored_version_summary(version: i64) -> String {
    format!("restored version {version}")
}

/// Describes one version-guarded write.
struct Mutation<'m> {
    page_id: &'m str,
    expected_version: i64,
    actor: &'m str,
    change_type: ChangeType,
    summary: Option<String>,
    now: DateTime<Utc>,
}

/// Content store backed by the `page_content` and `content_history` tables.
pub struct ContentStore<'a> {
    conn: &'a Connection,
    retention: usize,
}

impl<'a> ContentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_retention(conn, DEFAULT_HISTORY_RETENTION)
    }

    pub fn with_retention(conn: &'a Connection, retention: usize) -> Self {
        Self { conn, retention: retention.max(1) }
    }

    /// Initialize content for a page at version 1.
    pub fn create(
        &self,
        page_id: &str,
        blocks: Vec<Block>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let blocks = BlockTree::from_blocks(blocks)?.to_blocks();
        let tx = self.begin()?;

        if load_content(&tx, page_id)?.is_some() {
            return Err(CoreError::AlreadyExists { page_id: page_id.to_string() });
        }

        let content = PageContent {
            page_id: page_id.to_string(),
            blocks,
            version: 1,
            created_by: actor.to_string(),
            created_at: now,
            updated_by: actor.to_string(),
            updated_at: now,
        };
        let encoded = encode_json(&content.blocks)?;
        tx.execute(
            "INSERT INTO page_content \
             (page_id, blocks, version, created_by, created_at, updated_by, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?5)",
            params![page_id, encoded, content.version, actor, format_timestamp(now)],
        )
        .context("failed to insert page content")?;

        append_history(
            &tx,
            &content,
            &encoded,
            ChangeType::Create,
            Some("initial content"),
            self.retention,
        )?;
        tx.commit().context("failed to commit content creation")?;

        Ok(content)
    }

    pub fn get(&self, page_id: &str) -> CoreResult<PageContent> {
        load_content(self.conn, page_id)?.ok_or_else(|| CoreError::not_found(Resource::Page, page_id))
    }

    /// Replace the whole block tree.
    pub fn replace(
        &self,
        page_id: &str,
        blocks: Vec<Block>,
        expected_version: i64,
        actor: &str,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let mutation = Mutation {
            page_id,
            expected_version,
            actor,
            change_type: ChangeType::Update,
            summary: summary.map(str::to_string),
            now,
        };
        self.commit(mutation, |_, tree| {
            *tree = BlockTree::from_blocks(blocks)?;
            Ok(())
        })
    }

    /// Replace a single block in place, wherever it sits in the tree.
    pub fn update_block(
        &self,
        page_id: &str,
        block_id: &str,
        block: Block,
        expected_version: i64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let mutation = Mutation {
            page_id,
            expected_version,
            actor,
            change_type: ChangeType::Update,
            summary: Some(updated_block_summary(block_id)),
            now,
        };
        self.commit(mutation, |_, tree| Ok(tree.replace(block_id, block)?))
    }

    /// Append a block after the last root-level block.
    pub fn add_block(
        &self,
        page_id: &str,
        block: Block,
        actor: &str,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let mutation = Mutation {
            page_id,
            expected_version,
            actor,
            change_type: ChangeType::BlockAdd,
            summary: Some(format!("added block {}", block.id)),
            now,
        };
        self.commit(mutation, |_, tree| Ok(tree.push_root(block)?))
    }

    /// Remove a block and its subtree.
    pub fn delete_block(
        &self,
        page_id: &str,
        block_id: &str,
        actor: &str,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let mutation = Mutation {
            page_id,
            expected_version,
            actor,
            change_type: ChangeType::BlockDelete,
            summary: Some(format!("deleted block {block_id}")),
            now,
        };
        self.commit(mutation, |_, tree| tree.remove(block_id).map(drop).map_err(CoreError::from))
    }

    /// Most recent history rows, newest first.
    pub fn history(&self, page_id: &str, limit: usize) -> CoreResult<Vec<HistoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT page_id, version, blocks, changed_by, changed_at, change_type, change_summary \
                 FROM content_history WHERE page_id = ?1 \
                 ORDER BY version DESC LIMIT ?2",
            )
            .context("failed to prepare history query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![page_id, limit], row_to_history)
            .context("failed to query content history")?;

        let entries = rows
            .collect::<Result<Vec<_>, _>>()
            .context("failed to decode content history rows")?;
        Ok(entries)
    }

    /// The snapshot recorded at exactly `version`, if still retained.
    pub fn version_snapshot(&self, page_id: &str, version: i64) -> CoreResult<HistoryEntry> {
        load_snapshot(self.conn, page_id, version)?
            .ok_or_else(|| CoreError::not_found(Resource::Version, format!("{page_id}@{version}")))
    }

    /// Make the snapshot at `target_version` the live content as a new version.
    pub fn restore_version(
        &self,
        page_id: &str,
        target_version: i64,
        actor: &str,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<PageContent> {
        let mutation = Mutation {
            page_id,
            expected_version,
            actor,
            change_type: ChangeType::Restore,
            summary: Some(restored_version_summary(target_version)),
            now,
        };
        self.commit(mutation, |conn, tree| {
            let snapshot = load_snapshot(conn, page_id, target_version)?.ok_or_else(|| {
                CoreError::not_found(Resource::Version, format!("{page_id}@{target_version}"))
            })?;
            *tree = BlockTree::from_blocks(snapshot.blocks)?;
            Ok(())
        })
    }

    // IMMEDIATE takes the write lock up front, so a second connection waits
    // on the busy timeout and then sees the committed version.
    fn begin(&self) -> CoreResult<Transaction<'a>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .context("failed to start content transaction")?;
        Ok(tx)
    }

    fn commit<F>(&self, mutation: Mutation<'_>, apply: F) -> CoreResult<PageContent>
    where
        F: FnOnce(&Connection, &mut BlockTree) -> CoreResult<()>,
    {
        let page_id = mutation.page_id;
        let tx = self.begin()?;

        let live = load_content(&tx, page_id)?
            .ok_or_else(|| CoreError::not_found(Resource::Page, page_id))?;
        if live.version != mutation.expected_version {
            return Err(CoreError::VersionConflict {
                page_id: page_id.to_string(),
                expected: mutation.expected_version,
                current: live.version,
            });
        }

        let mut tree = BlockTree::from_blocks(live.blocks)?;
        apply(&*tx, &mut tree)?;

        let next = PageContent {
            page_id: page_id.to_string(),
            blocks: tree.to_blocks(),
            version: live.version + 1,
            created_by: live.created_by,
            created_at: live.created_at,
            updated_by: mutation.actor.to_string(),
            updated_at: mutation.now,
        };
        let encoded = encode_json(&next.blocks)?;
        let updated = tx
            .execute(
                "UPDATE page_content \
                 SET blocks = ?1, version = ?2, updated_by = ?3, updated_at = ?4 \
                 WHERE page_id = ?5 AND version = ?6",
                params![
                    encoded,
                    next.version,
                    mutation.actor,
                    format_timestamp(mutation.now),
                    page_id,
                    mutation.expected_version,
                ],
            )
            .context("failed to update page content")?;
        if updated == 0 {
            let current = load_content(&tx, page_id)?.map(|content| content.version).unwrap_or(0);
            return Err(CoreError::VersionConflict {
                page_id: page_id.to_string(),
                expected: mutation.expected_version,
                current,
            });
        }

        append_history(
            &tx,
            &next,
            &encoded,
            mutation.change_type,
            mutation.summary.as_deref(),
            self.retention,
        )?;
        tx.commit().context("failed to commit content mutation")?;

        Ok(next)
    }
}

fn load_content(conn: &Connection, page_id: &str) -> CoreResult<Option<PageContent>> {
    let content = conn
        .query_row(
            "SELECT page_id, blocks, version, created_by, created_at, updated_by, updated_at \
             FROM page_content WHERE page_id = ?1",
            params![page_id],
            |row| {
                let blocks: String = row.get(1)?;
                let created_at: String = row.get(4)?;
                let updated_at: String = row.get(6)?;
                Ok(PageContent {
                    page_id: row.get(0)?,
                    blocks: decode_json(1, &blocks)?,
                    version: row.get(2)?,
                    created_by: row.get(3)?,
                    created_at: parse_timestamp(4, &created_at)?,
                    updated_by: row.get(5)?,
                    updated_at: parse_timestamp(6, &updated_at)?,
                })
            },
        )
        .optional()
        .context("failed to load page content")?;
    Ok(content)
}

fn load_snapshot(conn: &Connection, page_id: &str, version: i64) -> CoreResult<Option<HistoryEntry>> {
    let snapshot = conn
        .query_row(
            "SELECT page_id, version, blocks, changed_by, changed_at, change_type, change_summary \
             FROM content_history WHERE page_id = ?1 AND version = ?2",
            params![page_id, version],
            row_to_history,
        )
        .optional()
        .context("failed to load history snapshot")?;
    Ok(snapshot)
}

fn append_history(
    conn: &Connection,
    content: &PageContent,
    encoded_blocks: &str,
    change_type: ChangeType,
    summary: Option<&str>,
    retention: usize,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO content_history \
         (page_id, version, blocks, changed_by, changed_at, change_type, change_summary) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            content.page_id,
            content.version,
            encoded_blocks,
            content.updated_by,
            format_timestamp(content.updated_at),
            change_type.as_str(),
            summary,
        ],
    )
    .context("failed to append content history")?;

    let retention = i64::try_from(retention).unwrap_or(i64::MAX);
    conn.execute(
        "DELETE FROM content_history \
         WHERE page_id = ?1 AND version NOT IN ( \
             SELECT version FROM content_history WHERE page_id = ?1 \
             ORDER BY version DESC LIMIT ?2 \
         )",
        params![content.page_id, retention],
    )
    .context("failed to prune content history")?;

    Ok(())
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let blocks: String = row.get(2)?;
    let changed_at: String = row.get(4)?;
    let change_type: String = row.get(5)?;
    Ok(HistoryEntry {
        page_id: row.get(0)?,
        version: row.get(1)?,
        blocks: decode_json(2, &blocks)?,
        changed_by: row.get(3)?,
        changed_at: parse_timestamp(4, &changed_at)?,
        change_type: ChangeType::parse(&change_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown change type `{change_type}`").into(),
            )
        })?,
        change_summary: row.get(6)?,
    })
}
