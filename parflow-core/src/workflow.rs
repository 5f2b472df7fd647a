//! Workflow descriptions and tree building.
//!
//! A [`Workflow`] is the user-facing description: estimators chained in
//! pipes and wrapped by splitters. [`Tree::build`] expands it into an
//! execution tree, one deep copy of each estimator per branch.

use tracing::debug;

use crate::error::WorkflowError;
use crate::estimator::Estimator;
use crate::key::{self, KeyLevel, SignatureArgs};
use crate::node::{Node, NodeId, Tree};
use crate::reduce::Reducer;
use crate::slicer::RowSlicer;
use crate::splitter::{CrossValidation, CvConfig, PermConfig, Permutations, Splitter};

#[derive(Debug, Clone)]
pub enum Workflow {
    Estimator(Box<dyn Estimator>),
    /// Each step becomes the only child of the previous one. Steps after a
    /// splitter are appended under every leaf of that splitter.
    Pipe(Vec<Workflow>),
    CrossValidation {
        node: Box<Workflow>,
        config: CvConfig,
        reducer: Option<Box<dyn Reducer>>,
    },
    Permutations {
        node: Box<Workflow>,
        config: PermConfig,
        reducer: Option<Box<dyn Reducer>>,
    },
    Methods(Vec<Workflow>),
    Grid(Vec<Workflow>),
}

impl Workflow {
    pub fn estimator(estimator: impl Estimator + 'static) -> Self {
        Workflow::Estimator(Box::new(estimator))
    }

    pub fn pipe(steps: impl IntoIterator<Item = Workflow>) -> Self {
        Workflow::Pipe(steps.into_iter().collect())
    }

    pub fn cv(node: Workflow, config: CvConfig) -> Self {
        Workflow::CrossValidation {
            node: Box::new(node),
            config,
            reducer: None,
        }
    }

    pub fn perms(node: Workflow, config: PermConfig) -> Self {
        Workflow::Permutations {
            node: Box::new(node),
            config,
            reducer: None,
        }
    }

    pub fn methods(alternatives: impl IntoIterator<Item = Workflow>) -> Self {
        Workflow::Methods(alternatives.into_iter().collect())
    }

    pub fn grid(alternatives: impl IntoIterator<Item = Workflow>) -> Self {
        Workflow::Grid(alternatives.into_iter().collect())
    }

    /// Attach a reducer to a CV or permutation workflow; other variants are
    /// returned unchanged.
    pub fn with_reducer(self, reducer: impl Reducer + 'static) -> Self {
        match self {
            Workflow::CrossValidation { node, config, .. } => Workflow::CrossValidation {
                node,
                config,
                reducer: Some(Box::new(reducer)),
            },
            Workflow::Permutations { node, config, .. } => Workflow::Permutations {
                node,
                config,
                reducer: Some(Box::new(reducer)),
            },
            other => other,
        }
    }
}

// ─── Building ────────────────────────────────────────────────────────

impl Tree {
    /// Expand a workflow into an execution tree.
    ///
    /// Fails with `AmbiguousWorkflow` when two nodes end up with the same
    /// full key, and with `InvalidConfig` for empty splitters or a non-leaf
    /// estimator that cannot transform.
    pub fn build(workflow: &Workflow) -> Result<Tree, WorkflowError> {
        let mut builder = Builder { tree: None };
        builder.place(None, workflow, &[])?;
        let tree = builder
            .tree
            .ok_or_else(|| WorkflowError::InvalidConfig("empty workflow".to_string()))?;

        for id in tree.walk_nodes(tree.root()) {
            if let Some(e) = tree.node(id).as_estimator() {
                if !tree.is_leaf(id) && !e.capabilities().transform {
                    return Err(WorkflowError::InvalidConfig(format!(
                        "{} has children but cannot transform",
                        tree.get_key(id, KeyLevel::Full)
                    )));
                }
            }
        }
        let duplicates = tree.duplicate_keys();
        if !duplicates.is_empty() {
            return Err(WorkflowError::AmbiguousWorkflow(format!(
                "node keys are not unique: {}",
                duplicates.join(", ")
            )));
        }
        debug!(nodes = tree.len(), leaves = tree.get_leaves(tree.root()).len(), "tree built");
        Ok(tree)
    }
}

struct Builder {
    tree: Option<Tree>,
}

impl Builder {
    fn push(&mut self, parent: Option<NodeId>, node: Node) -> NodeId {
        match (&mut self.tree, parent) {
            (Some(tree), Some(parent)) => tree.add_child(parent, node),
            (tree, _) => {
                let new = Tree::new(node);
                let root = new.root();
                *tree = Some(new);
                root
            }
        }
    }

    fn tree_mut(&mut self) -> Result<&mut Tree, WorkflowError> {
        self.tree
            .as_mut()
            .ok_or_else(|| WorkflowError::InvalidConfig("splitter without a tree".to_string()))
    }

    /// Place `workflow` under `parent`, then chain `rest` under each of its
    /// leaves.
    fn place(
        &mut self,
        parent: Option<NodeId>,
        workflow: &Workflow,
        rest: &[&Workflow],
    ) -> Result<(), WorkflowError> {
        match workflow {
            Workflow::Estimator(estimator) => {
                let id = self.push(parent, Node::estimator(estimator.clone_box())?);
                self.place_rest(id, rest)
            }
            Workflow::Pipe(steps) => {
                let mut chain: Vec<&Workflow> = steps.iter().collect();
                chain.extend_from_slice(rest);
                match chain.split_first() {
                    Some((first, tail)) => self.place(parent, first, tail),
                    None => Err(WorkflowError::InvalidConfig("empty pipe".to_string())),
                }
            }
            Workflow::CrossValidation {
                node,
                config,
                reducer,
            } => {
                if config.n_folds == 0 {
                    return Err(WorkflowError::InvalidConfig("CV with zero folds".to_string()));
                }
                let splitter = Splitter::CrossValidation(CrossValidation {
                    config: config.clone(),
                    reducer: reducer.clone(),
                });
                self.place_sliced(parent, splitter, config.n_folds, node, rest)
            }
            Workflow::Permutations {
                node,
                config,
                reducer,
            } => {
                if config.n_perms == 0 {
                    return Err(WorkflowError::InvalidConfig(
                        "permutations with zero perms".to_string(),
                    ));
                }
                let splitter = Splitter::Permutations(Permutations {
                    config: config.clone(),
                    reducer: reducer.clone(),
                });
                self.place_sliced(parent, splitter, config.n_perms, node, rest)
            }
            Workflow::Methods(alternatives) => self
                .place_alternatives(parent, Splitter::Methods, alternatives, rest)
                .map(drop),
            Workflow::Grid(alternatives) => {
                let id = self.place_alternatives(parent, Splitter::Grid, alternatives, rest)?;
                let tree = self.tree_mut()?;
                for child in tree.children(id).to_vec() {
                    tree.node_mut(child).set_wildcard(true);
                }
                Ok(())
            }
        }
    }

    fn place_rest(&mut self, id: NodeId, rest: &[&Workflow]) -> Result<(), WorkflowError> {
        match rest.split_first() {
            Some((first, tail)) => self.place(Some(id), first, tail),
            None => Ok(()),
        }
    }

    fn place_sliced(
        &mut self,
        parent: Option<NodeId>,
        splitter: Splitter,
        fan_out: usize,
        node: &Workflow,
        rest: &[&Workflow],
    ) -> Result<(), WorkflowError> {
        let name = splitter.name();
        let scope = splitter.slicer_scope();
        let id = self.push(parent, Node::splitter(splitter));
        for nb in 0..fan_out {
            let slicer = self.push(Some(id), Node::slicer(name, RowSlicer::new(nb, scope.clone())));
            self.place(Some(slicer), node, rest)?;
        }
        Ok(())
    }

    fn place_alternatives(
        &mut self,
        parent: Option<NodeId>,
        splitter: Splitter,
        alternatives: &[Workflow],
        rest: &[&Workflow],
    ) -> Result<NodeId, WorkflowError> {
        if alternatives.is_empty() {
            return Err(WorkflowError::InvalidConfig(format!(
                "{} without alternatives",
                splitter.name()
            )));
        }
        let id = self.push(parent, Node::splitter(splitter));
        for alternative in alternatives {
            self.place(Some(id), alternative, rest)?;
        }
        disambiguate(self.tree_mut()?, id)?;
        Ok(id)
    }
}

// ─── Disambiguation ──────────────────────────────────────────────────

/// Signature argument added to inner nodes that only their subtrees tell
/// apart.
pub const BRANCH_ARG: &str = "branch";

/// Give the descendants of `splitter` enough signature arguments for every
/// leaf key under it to be unique.
///
/// Works one generation at a time: siblings-by-generation whose keys
/// (relative to the splitter) collide get the arguments on which their
/// states differ, then the next generation is examined with the refined
/// keys. Identical states cannot be told apart and leave the collision in
/// place; it surfaces as `AmbiguousWorkflow`.
pub fn disambiguate(tree: &mut Tree, splitter: NodeId) -> Result<(), WorkflowError> {
    let mut generation: Vec<NodeId> = tree.children(splitter).to_vec();
    while !generation.is_empty() {
        let keys: Vec<String> = generation
            .iter()
            .map(|&id| tree.get_key_from(splitter, id, KeyLevel::Full))
            .collect();
        for group in key::collisions(&keys) {
            let states: Vec<SignatureArgs> = group
                .iter()
                .map(|&i| tree.node(generation[i]).state())
                .collect();
            let diff = key::dict_diff(&states);
            if diff.is_empty() {
                continue;
            }
            for (&i, state) in group.iter().zip(&states) {
                tree.node_mut(generation[i])
                    .set_signature_args(key::sub_dict(state, &diff));
            }
        }
        generation = next_generation(tree, &generation);
    }
    separate_branches(tree, splitter);

    let leaves = tree.get_leaves(splitter);
    let keys: Vec<String> = leaves
        .iter()
        .map(|&id| tree.get_key_from(splitter, id, KeyLevel::Full))
        .collect();
    if let Some(group) = key::collisions(&keys).first() {
        return Err(WorkflowError::AmbiguousWorkflow(format!(
            "{} alternatives under {} share key '{}'",
            group.len(),
            tree.get_key(splitter, KeyLevel::Full),
            keys[group[0]]
        )));
    }
    Ok(())
}

fn next_generation(tree: &Tree, generation: &[NodeId]) -> Vec<NodeId> {
    generation
        .iter()
        .flat_map(|&id| tree.children(id).to_vec())
        .collect()
}

/// Index of the alternative of `splitter` that `id` descends from.
fn branch_of(tree: &Tree, splitter: NodeId, mut id: NodeId) -> usize {
    while let Some(parent) = tree.parent(id) {
        if parent == splitter {
            return tree.children(splitter).iter().position(|&c| c == id).unwrap_or(0);
        }
        id = parent;
    }
    0
}

/// Keys of every node below `id`, relative to `id`.
fn subtree_keys(tree: &Tree, id: NodeId) -> Vec<String> {
    tree.walk_nodes(id)
        .filter(|&d| d != id)
        .map(|d| tree.get_key_from(id, d, KeyLevel::Full))
        .collect()
}

/// Inner nodes whose states are identical but whose subtrees differ still
/// need distinct keys: they get a `branch` argument naming their
/// alternative. Colliding leaves, and inner nodes with identical subtrees,
/// are left for the leaf check to reject.
fn separate_branches(tree: &mut Tree, splitter: NodeId) {
    let mut generation: Vec<NodeId> = tree.children(splitter).to_vec();
    while !generation.is_empty() {
        let keys: Vec<String> = generation
            .iter()
            .map(|&id| tree.get_key_from(splitter, id, KeyLevel::Full))
            .collect();
        for group in key::collisions(&keys) {
            if group.iter().all(|&i| tree.is_leaf(generation[i])) {
                continue;
            }
            let subtrees: Vec<String> = group
                .iter()
                .map(|&i| subtree_keys(tree, generation[i]).join("\n"))
                .collect();
            if !key::collisions(&subtrees).is_empty() {
                continue;
            }
            for &i in &group {
                let id = generation[i];
                let branch = branch_of(tree, splitter, id);
                let mut args = tree.node(id).signature_args().clone();
                args.insert(BRANCH_ARG.to_string(), branch.to_string());
                tree.node_mut(id).set_signature_args(args);
            }
        }
        generation = next_generation(tree, &generation);
    }
}
