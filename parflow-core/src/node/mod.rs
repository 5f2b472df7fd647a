//! Execution tree: an arena of nodes addressed by [`NodeId`].
//!
//! Parents own their children through index lists and children point back to
//! their parent by index, so the tree has no reference cycles and clones
//! deeply with a plain `Clone`. Nodes are never removed; a tree is discarded
//! as a whole.

mod exec;

pub use exec::{Op, PRED, TRUE};

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::estimator::{Capabilities, Estimator};
use crate::key::{self, KeyLevel, SignatureArgs};
use crate::output::{OutputMap, OutputValue};
use crate::slicer::RowSlicer;
use crate::splitter::Splitter;

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

// ─── Node ────────────────────────────────────────────────────────────

/// An estimator wrapped as a node, with its capabilities checked once.
#[derive(Debug, Clone)]
pub struct EstimatorNode {
    estimator: Box<dyn Estimator>,
    capabilities: Capabilities,
}

impl EstimatorNode {
    pub fn new(estimator: Box<dyn Estimator>) -> Result<Self, WorkflowError> {
        let capabilities = estimator.capabilities();
        if !capabilities.predict && !capabilities.transform {
            return Err(WorkflowError::InvalidConfig(format!(
                "{} can neither predict nor transform",
                estimator.type_tag()
            )));
        }
        Ok(Self {
            estimator,
            capabilities,
        })
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Estimator(EstimatorNode),
    Splitter(Splitter),
    Slicer(RowSlicer),
}

/// A tree vertex.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    signature_args: SignatureArgs,
    /// Collapse to `name(*)` in level-2 keys.
    wildcard: bool,
    pub(crate) kind: NodeKind,
    map_outputs: OutputMap,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            signature_args: SignatureArgs::new(),
            wildcard: false,
            kind,
            map_outputs: OutputMap::new(),
        }
    }

    pub fn estimator(estimator: Box<dyn Estimator>) -> Result<Self, WorkflowError> {
        let name = estimator.type_tag();
        Ok(Self::new(name, NodeKind::Estimator(EstimatorNode::new(estimator)?)))
    }

    pub fn splitter(splitter: Splitter) -> Self {
        Self::new(splitter.name(), NodeKind::Splitter(splitter))
    }

    /// Slicer child `nb` of a splitter called `name`. Slicers are always
    /// wildcarded: folds and permutations of one splitter share level-2 keys.
    pub fn slicer(name: &str, slicer: RowSlicer) -> Self {
        let mut node = Self::new(name, NodeKind::Slicer(slicer));
        let nb = node.as_slicer().map_or(0, |s| s.nb);
        node.signature_args.insert("nb".to_string(), nb.to_string());
        node.wildcard = true;
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature_args(&self) -> &SignatureArgs {
        &self.signature_args
    }

    pub fn set_signature_args(&mut self, args: SignatureArgs) {
        self.signature_args = args;
    }

    pub fn wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn set_wildcard(&mut self, wildcard: bool) {
        self.wildcard = wildcard;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn signature(&self, level: KeyLevel) -> String {
        key::signature(&self.name, &self.signature_args, self.wildcard, level)
    }

    /// Full constructor state, used to tell colliding siblings apart.
    pub fn state(&self) -> SignatureArgs {
        match &self.kind {
            NodeKind::Estimator(e) => e.estimator.params(),
            NodeKind::Splitter(s) => s.state(),
            NodeKind::Slicer(_) => self.signature_args.clone(),
        }
    }

    pub fn as_estimator(&self) -> Option<&EstimatorNode> {
        match &self.kind {
            NodeKind::Estimator(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_splitter(&self) -> Option<&Splitter> {
        match &self.kind {
            NodeKind::Splitter(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_slicer(&self) -> Option<&RowSlicer> {
        match &self.kind {
            NodeKind::Slicer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_slicer_mut(&mut self) -> Option<&mut RowSlicer> {
        match &mut self.kind {
            NodeKind::Slicer(s) => Some(s),
            _ => None,
        }
    }

    pub fn map_outputs(&self) -> &OutputMap {
        &self.map_outputs
    }

    /// Last writer wins for a given key.
    pub fn add_map_output(&mut self, key: impl Into<String>, value: impl Into<OutputValue>) {
        self.map_outputs.insert(key.into(), value.into());
    }

    pub fn add_map_outputs<I, K>(&mut self, outputs: I)
    where
        I: IntoIterator<Item = (K, OutputValue)>,
        K: Into<String>,
    {
        for (k, v) in outputs {
            self.map_outputs.insert(k.into(), v);
        }
    }

    pub fn clear_map_outputs(&mut self) {
        self.map_outputs.clear();
    }
}

// ─── Tree ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed execution tree. The root is always `NodeId(0)`.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Self {
            slots: vec![Slot {
                node: root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: NodeId) -> &Slot {
        &self.slots[id.0]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.slot(id).node
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.slots[id.0].node
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slot(id).children
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.slot(id).children.is_empty()
    }

    pub fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            node,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.slots[parent.0].children.push(id);
        id
    }

    pub fn add_children<I>(&mut self, parent: NodeId, nodes: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = Node>,
    {
        nodes.into_iter().map(|n| self.add_child(parent, n)).collect()
    }

    // ─── Addressing ──────────────────────────────────────────────────

    /// Nodes from the root down to `id`, both included.
    pub fn get_path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut cursor = id;
        while let Some(parent) = self.parent(cursor) {
            path.push(parent);
            cursor = parent;
        }
        path.reverse();
        path
    }

    pub fn get_signature(&self, id: NodeId, level: KeyLevel) -> String {
        self.node(id).signature(level)
    }

    pub fn get_key(&self, id: NodeId, level: KeyLevel) -> String {
        key::join_key(
            self.get_path_from_root(id)
                .into_iter()
                .map(|n| self.get_signature(n, level)),
        )
    }

    /// Key of `id` relative to `ancestor`, which is excluded from the key.
    pub fn get_key_from(&self, ancestor: NodeId, id: NodeId, level: KeyLevel) -> String {
        let path = self.get_path_from_root(id);
        let start = path.iter().position(|&n| n == ancestor).map_or(0, |p| p + 1);
        key::join_key(path[start..].iter().map(|&n| self.get_signature(n, level)))
    }

    /// Resolve a full (level-1) key.
    pub fn node_by_key(&self, key: &str) -> Option<NodeId> {
        let mut parts = key.split(key::KEY_SEP);
        let root = self.root();
        if parts.next()? != self.get_signature(root, KeyLevel::Full) {
            return None;
        }
        parts.try_fold(root, |cursor, part| {
            self.children(cursor)
                .iter()
                .copied()
                .find(|&c| self.get_signature(c, KeyLevel::Full) == part)
        })
    }

    pub fn require(&self, key: &str) -> Result<NodeId, WorkflowError> {
        self.node_by_key(key)
            .ok_or_else(|| WorkflowError::UnknownKey(key.to_string()))
    }

    // ─── Traversal ───────────────────────────────────────────────────

    /// Lazy depth-first, left-to-right walk of the subtree at `id`.
    pub fn walk_nodes(&self, id: NodeId) -> WalkNodes<'_> {
        WalkNodes {
            tree: self,
            stack: vec![id],
        }
    }

    pub fn walk_leaves(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.walk_nodes(id).filter(move |&n| self.is_leaf(n))
    }

    /// Leaves under `id` in depth-first, left-to-right order.
    pub fn get_leaves(&self, id: NodeId) -> Vec<NodeId> {
        self.walk_leaves(id).collect()
    }

    /// Full keys of every leaf of the tree, in leaf order.
    pub fn leaf_keys(&self) -> Vec<String> {
        self.walk_leaves(self.root())
            .map(|l| self.get_key(l, KeyLevel::Full))
            .collect()
    }

    // ─── Map outputs ─────────────────────────────────────────────────

    pub fn add_map_output(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<OutputValue>) {
        self.node_mut(id).add_map_output(key, value);
    }

    pub fn add_map_outputs<I, K>(&mut self, id: NodeId, outputs: I)
    where
        I: IntoIterator<Item = (K, OutputValue)>,
        K: Into<String>,
    {
        self.node_mut(id).add_map_outputs(outputs);
    }

    pub fn clear_map_outputs(&mut self) {
        self.slots.iter_mut().for_each(|s| s.node.clear_map_outputs());
    }

    /// Full keys that appear more than once; empty for a valid tree.
    pub(crate) fn duplicate_keys(&self) -> Vec<String> {
        let keys: Vec<String> = self
            .walk_nodes(self.root())
            .map(|id| self.get_key(id, KeyLevel::Full))
            .collect();
        key::collisions(&keys)
            .into_iter()
            .map(|group| keys[group[0]].clone())
            .collect()
    }
}

/// Iterator returned by [`Tree::walk_nodes`].
pub struct WalkNodes<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl Iterator for WalkNodes<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::SignClassifier;
    use crate::slicer::RowSlicer;
    use crate::splitter::{CrossValidation, CvConfig, CvKind};

    fn leaf() -> Node {
        Node::estimator(Box::new(SignClassifier::default())).unwrap()
    }

    /// CV(3) → slicer → SignClassifier
    fn cv_tree() -> Tree {
        let cv = Splitter::CrossValidation(CrossValidation {
            config: CvConfig::new(3, CvKind::Random),
            reducer: None,
        });
        let mut tree = Tree::new(Node::splitter(cv));
        let root = tree.root();
        for nb in 0..3 {
            let s = tree.add_child(root, Node::slicer("CV", RowSlicer::new(nb, None)));
            tree.add_child(s, leaf());
        }
        tree
    }

    #[test]
    fn keys_at_both_levels() {
        let tree = cv_tree();
        let leaf = tree.get_leaves(tree.root())[1];
        assert_eq!(tree.get_key(leaf, KeyLevel::Full), "CV/CV(nb=1)/SignClassifier");
        assert_eq!(tree.get_key(leaf, KeyLevel::Collapsed), "CV/CV(*)/SignClassifier");
        let slicer = tree.parent(leaf).unwrap();
        assert_eq!(
            tree.get_key_from(tree.root(), leaf, KeyLevel::Full),
            "CV(nb=1)/SignClassifier"
        );
        assert_eq!(tree.get_key_from(slicer, leaf, KeyLevel::Full), "SignClassifier");
    }

    #[test]
    fn leaves_are_ordered_and_stable() {
        let tree = cv_tree();
        let first = tree.leaf_keys();
        assert_eq!(first.len(), 3);
        assert_eq!(first, tree.leaf_keys());
        assert!(first[0].contains("nb=0") && first[2].contains("nb=2"));
    }

    #[test]
    fn walk_is_preorder_and_restartable() {
        let tree = cv_tree();
        let walk: Vec<usize> = tree.walk_nodes(tree.root()).map(NodeId::index).collect();
        assert_eq!(walk, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(tree.walk_nodes(tree.root()).count(), 7);
    }

    #[test]
    fn path_from_root_and_lookup() {
        let tree = cv_tree();
        let leaf = tree.get_leaves(tree.root())[2];
        let path = tree.get_path_from_root(leaf);
        assert_eq!(path.first(), Some(&tree.root()));
        assert_eq!(path.last(), Some(&leaf));
        let key = tree.get_key(leaf, KeyLevel::Full);
        assert_eq!(tree.node_by_key(&key), Some(leaf));
        assert_eq!(tree.node_by_key("CV/CV(nb=9)"), None);
        assert!(matches!(tree.require("nope"), Err(WorkflowError::UnknownKey(_))));
    }

    #[test]
    fn map_outputs_last_writer_wins() {
        let mut tree = cv_tree();
        let leaf = tree.get_leaves(tree.root())[0];
        tree.add_map_output(leaf, "score", 0.5);
        tree.add_map_output(leaf, "score", 0.7);
        assert_eq!(tree.node(leaf).map_outputs().get("score"), Some(&OutputValue::Scalar(0.7)));
        tree.clear_map_outputs();
        assert!(tree.node(leaf).map_outputs().is_empty());
    }

    #[test]
    fn clone_is_deep() {
        let tree = cv_tree();
        let mut copy = tree.clone();
        let leaf = copy.get_leaves(copy.root())[0];
        copy.add_map_output(leaf, "pred", vec![1.0]);
        assert!(tree.node(leaf).map_outputs().is_empty());
    }

    #[test]
    fn duplicate_leaves_are_detected() {
        let mut tree = Tree::new(Node::splitter(Splitter::Methods));
        let root = tree.root();
        tree.add_children(root, [leaf(), leaf()]);
        assert_eq!(tree.duplicate_keys().len(), 1);
    }
}
