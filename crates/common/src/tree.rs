// Arena-backed block tree with a flat id index.
//
// Nodes live in a slot vector and reference each other by index, so
// structural edits never alias the snapshots handed out by `to_blocks`.
// The index maps every block id in the page to its slot, which makes
// lookup O(1) and duplicate detection correct at any depth.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::error::{CoreError, Resource};
use crate::types::Block;

type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("block `{0}` not found")]
    NotFound(String),
    #[error("duplicate block id `{0}`")]
    DuplicateId(String),
}

impl From<TreeError> for CoreError {
    fn from(error: TreeError) -> Self {
        match error {
            TreeError::NotFound(id) => CoreError::not_found(Resource::Block, id),
            TreeError::DuplicateId(id) => {
                CoreError::illegal_state(format!("duplicate block id `{id}`"))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    kind: String,
    payload: Value,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    roots: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree, rejecting any id that appears twice anywhere in `blocks`.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, TreeError> {
        collect_ids(&blocks, &mut HashSet::new())?;

        let mut tree = Self::default();
        for block in blocks {
            let root = tree.insert_subtree(block, None);
            tree.roots.push(root);
        }
        Ok(tree)
    }

    /// Number of blocks at every depth.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.index.contains_key(block_id)
    }

    /// Materialize the subtree rooted at `block_id`.
    pub fn get(&self, block_id: &str) -> Option<Block> {
        self.index.get(block_id).and_then(|&node_id| self.materialize(node_id))
    }

    pub fn parent_of(&self, block_id: &str) -> Option<&str> {
        let node = self.node(*self.index.get(block_id)?)?;
        self.node(node.parent?).map(|parent| parent.id.as_str())
    }

    /// Block ids in pre-order, roots first to last.
    pub fn depth_first_ids(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(self.index.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(node_id) = stack.pop() {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            ids.push(node.id.as_str());
            stack.extend(node.children.iter().rev().copied());
        }
        ids
    }

    pub fn to_blocks(&self) -> Vec<Block> {
        self.roots.iter().filter_map(|&root| self.materialize(root)).collect()
    }

    /// Append `block` (and its subtree) after the last root.
    pub fn push_root(&mut self, block: Block) -> Result<(), TreeError> {
        self.ensure_insertable(&block, &HashSet::new())?;
        let root = self.insert_subtree(block, None);
        self.roots.push(root);
        Ok(())
    }

    /// Swap the subtree at `block_id` for `block`, keeping its position.
    ///
    /// The replacement may carry a different id, and may reuse ids from the
    /// subtree it replaces, but may not collide with any other block.
    pub fn replace(&mut self, block_id: &str, block: Block) -> Result<(), TreeError> {
        let target =
            *self.index.get(block_id).ok_or_else(|| TreeError::NotFound(block_id.to_string()))?;
        let replaced = self.subtree_ids(target);
        self.ensure_insertable(&block, &replaced)?;

        let parent = self.node(target).and_then(|node| node.parent);
        let position = self
            .siblings(parent)
            .iter()
            .position(|&sibling| sibling == target)
            .ok_or_else(|| TreeError::NotFound(block_id.to_string()))?;

        self.take_subtree(target);
        let inserted = self.insert_subtree(block, parent);
        self.siblings_mut(parent)[position] = inserted;
        Ok(())
    }

    /// Detach and return the subtree rooted at `block_id`.
    pub fn remove(&mut self, block_id: &str) -> Result<Block, TreeError> {
        let target =
            *self.index.get(block_id).ok_or_else(|| TreeError::NotFound(block_id.to_string()))?;
        let parent = self.node(target).and_then(|node| node.parent);
        self.siblings_mut(parent).retain(|&sibling| sibling != target);
        self.take_subtree(target).ok_or_else(|| TreeError::NotFound(block_id.to_string()))
    }

    fn ensure_insertable(
        &self,
        block: &Block,
        replaced: &HashSet<String>,
    ) -> Result<(), TreeError> {
        let mut incoming = HashSet::new();
        collect_ids(std::slice::from_ref(block), &mut incoming)?;
        match incoming.into_iter().find(|id| self.contains(id) && !replaced.contains(id)) {
            Some(duplicate) => Err(TreeError::DuplicateId(duplicate)),
            None => Ok(()),
        }
    }

    fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id).and_then(Option::as_ref)
    }

    fn siblings(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent.and_then(|parent| self.node(parent)) {
            Some(node) => &node.children,
            None => &self.roots,
        }
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(parent) => match self.nodes.get_mut(parent).and_then(Option::as_mut) {
                Some(node) => &mut node.children,
                None => &mut self.roots,
            },
            None => &mut self.roots,
        }
    }

    fn subtree_ids(&self, node_id: NodeId) -> HashSet<String> {
        let mut ids = HashSet::new();
        let mut stack = vec![node_id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node(current) {
                ids.insert(node.id.clone());
                stack.extend(node.children.iter().copied());
            }
        }
        ids
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn insert_subtree(&mut self, block: Block, parent: Option<NodeId>) -> NodeId {
        let Block { id, kind, payload, children } = block;
        let node_id = self.alloc(Node {
            id: id.clone(),
            kind,
            payload,
            parent,
            children: Vec::with_capacity(children.len()),
        });
        self.index.insert(id, node_id);

        let child_ids: Vec<NodeId> =
            children.into_iter().map(|child| self.insert_subtree(child, Some(node_id))).collect();
        if let Some(node) = self.nodes[node_id].as_mut() {
            node.children = child_ids;
        }
        node_id
    }

    fn take_subtree(&mut self, node_id: NodeId) -> Option<Block> {
        let node = self.nodes.get_mut(node_id)?.take()?;
        self.free.push(node_id);
        self.index.remove(&node.id);

        let children =
            node.children.iter().filter_map(|&child| self.take_subtree(child)).collect();
        Some(Block { id: node.id, kind: node.kind, payload: node.payload, children })
    }

    fn materialize(&self, node_id: NodeId) -> Option<Block> {
        let node = self.node(node_id)?;
        Some(Block {
            id: node.id.clone(),
            kind: node.kind.clone(),
            payload: node.payload.clone(),
            children: node.children.iter().filter_map(|&child| self.materialize(child)).collect(),
        })
    }
}

fn collect_ids(blocks: &[Block], seen: &mut HashSet<String>) -> Result<(), TreeError> {
    for block in blocks {
        if !seen.insert(block.id.clone()) {
            return Err(TreeError::DuplicateId(block.id.clone()));
        }
        collect_ids(&block.children, seen)?;
    }
    Ok(())
}
