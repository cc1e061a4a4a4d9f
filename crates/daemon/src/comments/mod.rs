// Block-anchored comment threads with user mentions.
//
// Comments form a forest per page through `parent_id`. Threads are rebuilt
// on read from a flat query: one pass partitions roots from replies keyed by
// parent, a second pass attaches replies with an explicit stack.
// Comments are independent of content versions; the anchor block id is not
// checked against the live tree.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;
use uuid::Uuid;
use wikidoc_common::error::{CoreError, CoreResult, Resource};
use wikidoc_common::types::{BlockComment, CommentMention, CommentNode};

use crate::store::{format_timestamp, parse_optional_timestamp, parse_timestamp};

/// Deepest reply level `add` accepts. A top-level comment is level 0.
pub const MAX_REPLY_DEPTH: usize = 64;

const COMMENT_COLUMNS: &str = "id, page_id, block_id, parent_id, content, created_by, \
     created_at, updated_at, resolved_at, resolved_by";

/// Payload for a new comment or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub page_id: String,
    pub block_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub actor: String,
    pub mentions: Vec<String>,
}

/// Comment store backed by `block_comments` and `comment_mentions`.
pub struct CommentStore<'a> {
    conn: &'a Connection,
}

impl<'a> CommentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Persist a comment and one mention row per distinct mentioned user.
    ///
    /// A reply deeper than `MAX_REPLY_DEPTH` is rejected. A `parent_id` that
    /// names no stored comment is kept as given; such a reply reads as a root.
    pub fn add(&self, new: NewComment, now: DateTime<Utc>) -> CoreResult<CommentNode> {
        let content = validate_content(&new.content)?;
        let mentions = normalize_mentions(&new.mentions);
        if let Some(parent_id) = new.parent_id.as_deref() {
            let depth = self.reply_depth(parent_id)?;
            if depth > MAX_REPLY_DEPTH {
                return Err(CoreError::illegal_state(format!(
                    "reply depth exceeds the limit of {MAX_REPLY_DEPTH}"
                )));
            }
        }
        let comment = BlockComment {
            id: Uuid::new_v4().to_string(),
            page_id: new.page_id,
            block_id: new.block_id,
            parent_id: new.parent_id,
            content,
            created_by: new.actor,
            created_at: now,
            updated_at: None,
            resolved_at: None,
            resolved_by: None,
            mentions,
        };

        let tx = self.conn.unchecked_transaction().context("failed to start comment transaction")?;
        tx.execute(
            "INSERT INTO block_comments \
             (id, page_id, block_id, parent_id, content, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                comment.id,
                comment.page_id,
                comment.block_id,
                comment.parent_id,
                comment.content,
                comment.created_by,
                format_timestamp(now),
            ],
        )
        .context("failed to insert comment")?;

        let rows = comment.mentions.iter().map(|user_id| CommentMention {
            comment_id: comment.id.clone(),
            mentioned_user_id: user_id.clone(),
            created_at: now,
        });
        for mention in rows {
            tx.execute(
                "INSERT OR IGNORE INTO comment_mentions (comment_id, mentioned_user_id, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![
                    mention.comment_id,
                    mention.mentioned_user_id,
                    format_timestamp(mention.created_at)
                ],
            )
            .context("failed to insert comment mention")?;
        }
        tx.commit().context("failed to commit comment")?;

        Ok(CommentNode::leaf(comment))
    }

    pub fn get(&self, comment_id: &str) -> CoreResult<BlockComment> {
        let comment = self
            .conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM block_comments WHERE id = ?1"),
                params![comment_id],
                row_to_comment,
            )
            .optional()
            .context("failed to load comment")?
            .ok_or_else(|| CoreError::not_found(Resource::Comment, comment_id))?;

        let mut with_mentions = self.attach_mentions(vec![comment])?;
        with_mentions.pop().ok_or_else(|| CoreError::not_found(Resource::Comment, comment_id))
    }

    /// Every thread on a page.
    pub fn page_threads(&self, page_id: &str) -> CoreResult<Vec<CommentNode>> {
        let comments = self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM block_comments WHERE page_id = ?1 \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![page_id],
        )?;
        Ok(build_threads(comments))
    }

    /// Threads anchored to one block.
    pub fn block_threads(&self, page_id: &str, block_id: &str) -> CoreResult<Vec<CommentNode>> {
        let comments = self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM block_comments \
                 WHERE page_id = ?1 AND block_id = ?2 \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![page_id, block_id],
        )?;
        Ok(build_threads(comments))
    }

    /// Unresolved comments on a page, flat.
    pub fn unresolved(&self, page_id: &str) -> CoreResult<Vec<BlockComment>> {
        self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM block_comments \
                 WHERE page_id = ?1 AND resolved_at IS NULL \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![page_id],
        )
    }

    /// Comments that mention `user_id`, newest first.
    pub fn mentioning(&self, user_id: &str) -> CoreResult<Vec<BlockComment>> {
        self.query_comments(
            "SELECT c.id, c.page_id, c.block_id, c.parent_id, c.content, c.created_by, \
                    c.created_at, c.updated_at, c.resolved_at, c.resolved_by \
             FROM block_comments c \
             JOIN comment_mentions m ON m.comment_id = c.id \
             WHERE m.mentioned_user_id = ?1 \
             ORDER BY c.created_at DESC, c.id DESC",
            params![user_id],
        )
    }

    /// Edit the text of a comment. Only its author may do so.
    pub fn update(
        &self,
        comment_id: &str,
        content: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<BlockComment> {
        let content = validate_content(content)?;
        let existing = self.get(comment_id)?;
        ensure_author(&existing, actor)?;

        self.conn
            .execute(
                "UPDATE block_comments SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![content, format_timestamp(now), comment_id],
            )
            .context("failed to update comment")?;

        Ok(BlockComment { content, updated_at: Some(now), ..existing })
    }

    /// Delete a comment. Only its author may do so.
    ///
    /// Mentions go with it; direct replies are re-parented to the deleted
    /// comment's parent, so a deleted root promotes its replies to roots.
    pub fn delete(&self, comment_id: &str, actor: &str) -> CoreResult<()> {
        let existing = self.get(comment_id)?;
        ensure_author(&existing, actor)?;

        let tx = self.conn.unchecked_transaction().context("failed to start comment transaction")?;
        if let Err(error) =
            tx.execute("DELETE FROM comment_mentions WHERE comment_id = ?1", params![comment_id])
        {
            warn!(comment_id, ?error, "failed to delete comment mentions; relying on cascade");
        }
        tx.execute(
            "UPDATE block_comments SET parent_id = ?1 WHERE parent_id = ?2",
            params![existing.parent_id, comment_id],
        )
        .context("failed to re-parent comment replies")?;
        tx.execute("DELETE FROM block_comments WHERE id = ?1", params![comment_id])
            .context("failed to delete comment")?;
        tx.commit().context("failed to commit comment deletion")?;

        Ok(())
    }

    pub fn resolve(
        &self,
        comment_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<BlockComment> {
        let existing = self.get(comment_id)?;
        if existing.is_resolved() {
            return Err(CoreError::AlreadyResolved { comment_id: comment_id.to_string() });
        }

        let changed = self
            .conn
            .execute(
                "UPDATE block_comments SET resolved_at = ?1, resolved_by = ?2 \
                 WHERE id = ?3 AND resolved_at IS NULL",
                params![format_timestamp(now), actor, comment_id],
            )
            .context("failed to resolve comment")?;
        if changed == 0 {
            return Err(CoreError::AlreadyResolved { comment_id: comment_id.to_string() });
        }

        Ok(BlockComment { resolved_at: Some(now), resolved_by: Some(actor.to_string()), ..existing })
    }

    /// Clear the resolution. Idempotent.
    pub fn unresolve(&self, comment_id: &str) -> CoreResult<BlockComment> {
        let existing = self.get(comment_id)?;
        if existing.is_resolved() {
            self.conn
                .execute(
                    "UPDATE block_comments SET resolved_at = NULL, resolved_by = NULL WHERE id = ?1",
                    params![comment_id],
                )
                .context("failed to unresolve comment")?;
        }

        Ok(BlockComment { resolved_at: None, resolved_by: None, ..existing })
    }

    /// Level a reply to `parent_id` would sit at: the parent plus its stored
    /// ancestors, counted up to one past the limit.
    fn reply_depth(&self, parent_id: &str) -> CoreResult<usize> {
        let limit = i64::try_from(MAX_REPLY_DEPTH).unwrap_or(i64::MAX);
        let depth: Option<i64> = self
            .conn
            .query_row(
                "WITH RECURSIVE chain(id, parent_id, depth) AS ( \
                     SELECT id, parent_id, 1 FROM block_comments WHERE id = ?1 \
                     UNION ALL \
                     SELECT c.id, c.parent_id, chain.depth + 1 \
                     FROM block_comments c JOIN chain ON c.id = chain.parent_id \
                     WHERE chain.depth <= ?2 \
                 ) \
                 SELECT MAX(depth) FROM chain",
                params![parent_id, limit],
                |row| row.get(0),
            )
            .context("failed to measure reply depth")?;
        Ok(depth.and_then(|depth| usize::try_from(depth).ok()).unwrap_or(0))
    }

    fn query_comments(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> CoreResult<Vec<BlockComment>> {
        let mut stmt = self.conn.prepare(sql).context("failed to prepare comment query")?;
        let comments = stmt
            .query_map(params, row_to_comment)
            .context("failed to query comments")?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to decode comment rows")?;
        self.attach_mentions(comments)
    }

    /// Mention rows of one comment in the order they were written.
    pub fn mentions(&self, comment_id: &str) -> CoreResult<Vec<CommentMention>> {
        let mut stmt = self.prepare_mentions()?;
        query_mentions(&mut stmt, comment_id)
    }

    fn attach_mentions(&self, mut comments: Vec<BlockComment>) -> CoreResult<Vec<BlockComment>> {
        if comments.is_empty() {
            return Ok(comments);
        }

        let mut stmt = self.prepare_mentions()?;
        for comment in &mut comments {
            comment.mentions = query_mentions(&mut stmt, &comment.id)?
                .into_iter()
                .map(|mention| mention.mentioned_user_id)
                .collect();
        }
        Ok(comments)
    }

    fn prepare_mentions(&self) -> CoreResult<rusqlite::Statement<'a>> {
        Ok(self
            .conn
            .prepare(
                "SELECT comment_id, mentioned_user_id, created_at FROM comment_mentions \
                 WHERE comment_id = ?1 ORDER BY rowid ASC",
            )
            .context("failed to prepare mention query")?)
    }
}

/// Assemble reply trees from comments ordered by creation time.
///
/// A reply whose parent is not among `comments` surfaces as a root. Nodes
/// at `MAX_REPLY_DEPTH` carry all of their descendants as direct replies,
/// so an assembled thread is never nested deeper than `MAX_REPLY_DEPTH + 1`.
pub fn build_threads(comments: Vec<BlockComment>) -> Vec<CommentNode> {
    let known: HashSet<String> = comments.iter().map(|comment| comment.id.clone()).collect();
    let mut roots = Vec::new();
    let mut replies: HashMap<String, Vec<BlockComment>> = HashMap::new();

    for comment in comments {
        match comment.parent_id.as_ref() {
            Some(parent) if known.contains(parent) => {
                replies.entry(parent.clone()).or_default().push(comment);
            }
            _ => roots.push(comment),
        }
    }

    let mut threads = Vec::with_capacity(roots.len());
    for root in roots {
        assemble_thread(root, &mut replies, &mut threads);
    }
    threads
}

struct Frame {
    node: CommentNode,
    depth: usize,
    pending: std::vec::IntoIter<BlockComment>,
}

impl Frame {
    fn open(comment: BlockComment, depth: usize, replies: &mut HashMap<String, Vec<BlockComment>>) -> Self {
        let pending = replies.remove(&comment.id).unwrap_or_default().into_iter();
        Self { node: CommentNode::leaf(comment), depth, pending }
    }
}

// Explicit stack: a parent is closed only after every child frame finished.
fn assemble_thread(
    root: BlockComment,
    replies: &mut HashMap<String, Vec<BlockComment>>,
    threads: &mut Vec<CommentNode>,
) {
    let mut stack = vec![Frame::open(root, 0, replies)];
    while let Some(frame) = stack.last_mut() {
        if let Some(child) = frame.pending.next() {
            let depth = frame.depth + 1;
            if depth >= MAX_REPLY_DEPTH {
                let flattened = drain_descendants(&child.id, replies);
                frame.node.replies.push(CommentNode { comment: child, replies: flattened });
            } else {
                stack.push(Frame::open(child, depth, replies));
            }
            continue;
        }

        let Some(finished) = stack.pop() else { break };
        match stack.last_mut() {
            Some(parent) => parent.node.replies.push(finished.node),
            None => threads.push(finished.node),
        }
    }
}

/// Every descendant of `comment_id` as a leaf, in creation order.
fn drain_descendants(
    comment_id: &str,
    replies: &mut HashMap<String, Vec<BlockComment>>,
) -> Vec<CommentNode> {
    let mut flat = Vec::new();
    let mut stack = vec![comment_id.to_string()];
    while let Some(id) = stack.pop() {
        for child in replies.remove(&id).unwrap_or_default() {
            stack.push(child.id.clone());
            flat.push(child);
        }
    }
    flat.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    flat.into_iter().map(CommentNode::leaf).collect()
}

fn validate_content(content: &str) -> CoreResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(CoreError::illegal_state("comment content must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn normalize_mentions(mentions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    mentions
        .iter()
        .map(|user_id| user_id.trim())
        .filter(|user_id| !user_id.is_empty() && seen.insert(user_id.to_string()))
        .map(str::to_string)
        .collect()
}

fn ensure_author(comment: &BlockComment, actor: &str) -> CoreResult<()> {
    if comment.created_by != actor {
        return Err(CoreError::Forbidden {
            actor: actor.to_string(),
            comment_id: comment.id.clone(),
        });
    }
    Ok(())
}

fn query_mentions(
    stmt: &mut rusqlite::Statement<'_>,
    comment_id: &str,
) -> CoreResult<Vec<CommentMention>> {
    let mentions = stmt
        .query_map(params![comment_id], |row| {
            let created_at: String = row.get(2)?;
            Ok(CommentMention {
                comment_id: row.get(0)?,
                mentioned_user_id: row.get(1)?,
                created_at: parse_timestamp(2, &created_at)?,
            })
        })
        .context("failed to query comment mentions")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to decode comment mentions")?;
    Ok(mentions)
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockComment> {
    let created_at: String = row.get(6)?;
    Ok(BlockComment {
        id: row.get(0)?,
        page_id: row.get(1)?,
        block_id: row.get(2)?,
        parent_id: row.get(3)?,
        content: row.get(4)?,
        created_by: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_optional_timestamp(7, row.get(7)?)?,
        resolved_at: parse_optional_timestamp(8, row.get(8)?)?,
        resolved_by: row.get(9)?,
        mentions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use wikidoc_common::error::ErrorKind;
    use wikidoc_common::types::{BlockComment, CommentNode};

    use super::{build_threads, CommentStore, NewComment, MAX_REPLY_DEPTH};
    use crate::store::format_timestamp;
    use crate::store::meta_db::MetaDb;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).single().expect("timestamp should be valid")
    }

    fn new_comment(block_id: &str, parent_id: Option<&str>, actor: &str) -> NewComment {
        NewComment {
            page_id: "p1".into(),
            block_id: block_id.into(),
            parent_id: parent_id.map(str::to_string),
            content: format!("comment by {actor}"),
            actor: actor.into(),
            mentions: Vec::new(),
        }
    }

    fn bare(id: &str, parent_id: Option<&str>) -> BlockComment {
        BlockComment {
            id: id.into(),
            page_id: "p1".into(),
            block_id: "b1".into(),
            parent_id: parent_id.map(str::to_string),
            content: id.into(),
            created_by: "alice".into(),
            created_at: ts(0),
            updated_at: None,
            resolved_at: None,
            resolved_by: None,
            mentions: Vec::new(),
        }
    }

    #[test]
    fn build_threads_nests_replies_at_any_depth() {
        let threads = build_threads(vec![bare("1", None), bare("2", Some("1")), bare("3", Some("2"))]);

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.id, "1");
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].comment.id, "2");
        assert_eq!(threads[0].replies[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].replies[0].comment.id, "3");
    }

    #[test]
    fn build_threads_surfaces_orphans_as_roots() {
        let threads = build_threads(vec![bare("1", None), bare("2", Some("gone"))]);
        let roots: Vec<&str> = threads.iter().map(|node| node.comment.id.as_str()).collect();
        assert_eq!(roots, vec!["1", "2"]);
    }

    #[test]
    fn add_persists_distinct_mentions_and_returns_empty_reply_list() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());

        let mut draft = new_comment("b1", None, "alice");
        draft.mentions = vec!["bob".into(), " bob ".into(), "".into(), "carol".into()];
        let node = store.add(draft, ts(0)).expect("add should succeed");

        assert!(node.replies.is_empty());
        assert_eq!(node.comment.mentions, vec!["bob".to_string(), "carol".to_string()]);
        let stored = store.get(&node.comment.id).expect("comment should load");
        assert_eq!(stored.mentions, vec!["bob".to_string(), "carol".to_string()]);

        let for_bob = store.mentioning("bob").expect("mentions should load");
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].id, node.comment.id);

        let rows = store.mentions(&node.comment.id).expect("mention rows should load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].mentioned_user_id, "carol");
        assert!(rows.iter().all(|m| m.comment_id == node.comment.id && m.created_at == ts(0)));
        assert!(store.mentions("nope").expect("unknown comment").is_empty());
    }

    #[test]
    fn add_rejects_blank_content() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let mut draft = new_comment("b1", None, "alice");
        draft.content = "   ".into();

        assert_eq!(store.add(draft, ts(0)).expect_err("blank").kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn page_and_block_threads_are_assembled_from_storage() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let root = store.add(new_comment("b1", None, "alice"), ts(0)).expect("root");
        let reply =
            store.add(new_comment("b1", Some(&root.comment.id), "bob"), ts(1)).expect("reply");
        store
            .add(new_comment("b1", Some(&reply.comment.id), "carol"), ts(2))
            .expect("nested reply");
        store.add(new_comment("b2", None, "dave"), ts(3)).expect("other block");

        let page = store.page_threads("p1").expect("page threads");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].count(), 3);
        assert_eq!(page[0].replies[0].replies[0].comment.created_by, "carol");

        let block = store.block_threads("p1", "b2").expect("block threads");
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].comment.created_by, "dave");
        assert!(store.page_threads("elsewhere").expect("empty page").is_empty());
    }

    #[test]
    fn only_the_author_may_edit_or_delete() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let node = store.add(new_comment("b1", None, "alice"), ts(0)).expect("add");
        let id = node.comment.id;

        let forbidden = store.update(&id, "hijack", "mallory", ts(1));
        assert_eq!(forbidden.expect_err("not author").kind(), ErrorKind::Forbidden);
        let forbidden = store.delete(&id, "mallory");
        assert_eq!(forbidden.expect_err("not author").kind(), ErrorKind::Forbidden);

        let edited = store.update(&id, "  fixed typo ", "alice", ts(2)).expect("author edit");
        assert_eq!(edited.content, "fixed typo");
        assert_eq!(edited.updated_at, Some(ts(2)));
        assert_eq!(store.get(&id).expect("reload").content, "fixed typo");

        let missing = store.update("nope", "text", "alice", ts(3));
        assert_eq!(missing.expect_err("missing").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn delete_removes_mentions_and_reparents_replies() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let root = store.add(new_comment("b1", None, "alice"), ts(0)).expect("root");
        let mut middle_draft = new_comment("b1", Some(&root.comment.id), "bob");
        middle_draft.mentions = vec!["carol".into()];
        let middle = store.add(middle_draft, ts(1)).expect("middle");
        let leaf =
            store.add(new_comment("b1", Some(&middle.comment.id), "carol"), ts(2)).expect("leaf");

        store.delete(&middle.comment.id, "bob").expect("delete middle");

        assert!(store.mentioning("carol").expect("mentions").is_empty());
        assert_eq!(store.get(&middle.comment.id).expect_err("gone").kind(), ErrorKind::NotFound);
        let moved = store.get(&leaf.comment.id).expect("leaf survives");
        assert_eq!(moved.parent_id.as_deref(), Some(root.comment.id.as_str()));

        store.delete(&root.comment.id, "alice").expect("delete root");
        let threads = store.page_threads("p1").expect("threads");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.id, leaf.comment.id);
        assert_eq!(threads[0].comment.parent_id, None);
    }

    #[test]
    fn resolve_twice_fails_and_unresolve_is_idempotent() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let id = store.add(new_comment("b1", None, "alice"), ts(0)).expect("add").comment.id;
        let other = store.add(new_comment("b1", None, "bob"), ts(1)).expect("add").comment.id;

        let resolved = store.resolve(&id, "bob", ts(2)).expect("resolve");
        assert_eq!(resolved.resolved_at, Some(ts(2)));
        assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));
        assert_eq!(
            store.resolve(&id, "carol", ts(3)).expect_err("twice").kind(),
            ErrorKind::AlreadyResolved
        );

        let unresolved: Vec<String> =
            store.unresolved("p1").expect("unresolved").into_iter().map(|c| c.id).collect();
        assert_eq!(unresolved, vec![other.clone()]);

        let reopened = store.unresolve(&id).expect("unresolve");
        assert_eq!(reopened.resolved_at, None);
        assert_eq!(reopened.resolved_by, None);
        store.unresolve(&id).expect("second unresolve is a no-op");
        assert_eq!(store.unresolved("p1").expect("unresolved").len(), 2);

        assert_eq!(store.unresolve("nope").expect_err("missing").kind(), ErrorKind::NotFound);
    }

    // ── Deep reply chains ───────────────────────────────────────────

    fn nesting_depth(root: &CommentNode) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(root, 0)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(node.replies.iter().map(|reply| (reply, depth + 1)));
        }
        deepest
    }

    #[test]
    fn add_rejects_replies_past_the_depth_limit() {
        let db = MetaDb::open_in_memory().expect("db should open");
        let store = CommentStore::new(db.connection());
        let mut parent = store.add(new_comment("b1", None, "alice"), ts(0)).expect("root").comment.id;
        for level in 1..=MAX_REPLY_DEPTH {
            parent = store
                .add(new_comment("b1", Some(&parent), "alice"), ts(level as i64))
                .expect("reply within the limit")
                .comment
                .id;
        }

        let error = store
            .add(new_comment("b1", Some(&parent), "alice"), ts(1000))
            .expect_err("reply past the limit");
        assert_eq!(error.kind(), ErrorKind::IllegalState);

        let threads = store.page_threads("p1").expect("threads");
        assert_eq!(threads[0].count(), MAX_REPLY_DEPTH + 1);
        assert_eq!(nesting_depth(&threads[0]), MAX_REPLY_DEPTH);
    }

    #[test]
    fn stored_chain_of_twenty_thousand_replies_loads_and_serializes() {
        const CHAIN: usize = 20_000;
        let db = MetaDb::open_in_memory().expect("db should open");
        {
            let tx = db.connection().unchecked_transaction().expect("transaction");
            let created_at = format_timestamp(ts(0));
            for i in 0..CHAIN {
                let parent = (i > 0).then(|| format!("c{:05}", i - 1));
                tx.execute(
                    "INSERT INTO block_comments \
                     (id, page_id, block_id, parent_id, content, created_by, created_at) \
                     VALUES (?1, 'p1', 'b1', ?2, 'x', 'alice', ?3)",
                    rusqlite::params![format!("c{i:05}"), parent, created_at],
                )
                .expect("insert chain row");
            }
            tx.commit().expect("commit chain");
        }

        let store = CommentStore::new(db.connection());
        let threads = store.page_threads("p1").expect("threads should load");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.id, "c00000");
        assert_eq!(threads[0].count(), CHAIN);
        assert!(nesting_depth(&threads[0]) <= MAX_REPLY_DEPTH + 1);

        let json = serde_json::to_string(&threads).expect("threads should serialize");
        assert!(json.contains("c19999"));

        let error = store
            .add(new_comment("b1", Some("c19999"), "bob"), ts(1))
            .expect_err("reply under the chain");
        assert_eq!(error.kind(), ErrorKind::IllegalState);
    }
}
