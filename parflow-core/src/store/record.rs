//! Node descriptors: a node's own attributes, without its relatives.
//!
//! Children are replaced by their signatures and the parent by `".."`, so a
//! descriptor never embeds another node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;
use crate::key::{KeyLevel, SignatureArgs};
use crate::node::{EstimatorNode, Node, NodeId, NodeKind, Tree};
use crate::registry::Registry;
use crate::slicer::RowSlicer;
use crate::splitter::{CrossValidation, CvConfig, PermConfig, Permutations, Splitter};

/// Parent reference written in descriptors.
pub const PARENT_REF: &str = "..";

/// A type tag plus the state its registry constructor accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedState {
    pub tag: String,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindRecord {
    Estimator(TaggedState),
    CrossValidation {
        config: CvConfig,
        reducer: Option<TaggedState>,
    },
    Permutations {
        config: PermConfig,
        reducer: Option<TaggedState>,
    },
    Methods,
    Grid,
    Slicer(RowSlicer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub signature_args: SignatureArgs,
    pub wildcard: bool,
    pub kind: KindRecord,
    /// `".."` for every node but the root.
    pub parent: Option<String>,
    /// Full signatures of the children, in order.
    pub children: Vec<String>,
}

impl NodeRecord {
    /// Fails with [`StoreError::Encode`] when the estimator state cannot be
    /// serialized.
    pub fn from_node(tree: &Tree, id: NodeId) -> Result<Self, StoreError> {
        let node = tree.node(id);
        let reducer = |s: &Splitter| {
            s.reducer().map(|r| TaggedState {
                tag: r.type_tag().to_string(),
                state: r.state(),
            })
        };
        let kind = match node.kind() {
            NodeKind::Estimator(e) => KindRecord::Estimator(TaggedState {
                tag: e.estimator().type_tag().to_string(),
                state: e.estimator().state().map_err(|source| StoreError::Encode {
                    key: tree.get_key(id, KeyLevel::Full),
                    source,
                })?,
            }),
            NodeKind::Splitter(s) => match s {
                Splitter::CrossValidation(cv) => KindRecord::CrossValidation {
                    config: cv.config.clone(),
                    reducer: reducer(s),
                },
                Splitter::Permutations(perm) => KindRecord::Permutations {
                    config: perm.config.clone(),
                    reducer: reducer(s),
                },
                Splitter::Methods => KindRecord::Methods,
                Splitter::Grid => KindRecord::Grid,
            },
            NodeKind::Slicer(slicer) => KindRecord::Slicer(slicer.clone()),
        };
        Ok(NodeRecord {
            name: node.name().to_string(),
            signature_args: node.signature_args().clone(),
            wildcard: node.wildcard(),
            kind,
            parent: tree.parent(id).map(|_| PARENT_REF.to_string()),
            children: tree
                .children(id)
                .iter()
                .map(|&c| tree.get_signature(c, KeyLevel::Full))
                .collect(),
        })
    }

    /// Rebuild the node (without relatives) through the registry.
    pub fn to_node(&self, key: &str, registry: &Registry) -> Result<Node, StoreError> {
        let kind = match &self.kind {
            KindRecord::Estimator(tagged) => {
                let estimator = registry.create_estimator(&tagged.tag, &tagged.state)?;
                let wrapped = EstimatorNode::new(estimator).map_err(|e| StoreError::corrupt(key, e))?;
                NodeKind::Estimator(wrapped)
            }
            KindRecord::CrossValidation { config, reducer } => {
                NodeKind::Splitter(Splitter::CrossValidation(CrossValidation {
                    config: config.clone(),
                    reducer: rebuild_reducer(reducer.as_ref(), registry)?,
                }))
            }
            KindRecord::Permutations { config, reducer } => {
                NodeKind::Splitter(Splitter::Permutations(Permutations {
                    config: config.clone(),
                    reducer: rebuild_reducer(reducer.as_ref(), registry)?,
                }))
            }
            KindRecord::Methods => NodeKind::Splitter(Splitter::Methods),
            KindRecord::Grid => NodeKind::Splitter(Splitter::Grid),
            KindRecord::Slicer(slicer) => NodeKind::Slicer(slicer.clone()),
        };
        let mut node = Node::new(self.name.clone(), kind);
        node.set_signature_args(self.signature_args.clone());
        node.set_wildcard(self.wildcard);
        Ok(node)
    }
}

fn rebuild_reducer(
    tagged: Option<&TaggedState>,
    registry: &Registry,
) -> Result<Option<Box<dyn crate::reduce::Reducer>>, StoreError> {
    tagged
        .map(|t| registry.create_reducer(&t.tag, &t.state))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::ClassificationReport;
    use crate::splitter::CvKind;
    use crate::workflow::Workflow;
    use std::collections::BTreeMap;

    use crate::data::DataFlow;
    use crate::estimator::{self, Capabilities, Estimator, EstimatorError};
    use crate::estimators::SignClassifier;

    fn tree() -> Tree {
        let wf = Workflow::cv(Workflow::estimator(SignClassifier::new(0.5)), CvConfig::new(2, CvKind::Random))
            .with_reducer(ClassificationReport);
        Tree::build(&wf).unwrap()
    }

    #[test]
    fn descriptor_names_children_and_parent() {
        let tree = tree();
        let root = NodeRecord::from_node(&tree, tree.root()).unwrap();
        assert_eq!(root.parent, None);
        assert_eq!(root.children, vec!["CV(nb=0)", "CV(nb=1)"]);
        let slicer = tree.children(tree.root())[0];
        assert_eq!(NodeRecord::from_node(&tree, slicer).unwrap().parent.as_deref(), Some(PARENT_REF));
    }

    #[test]
    fn descriptor_json_round_trip_rebuilds_node() {
        let tree = tree();
        let registry = Registry::with_builtins();
        for id in tree.walk_nodes(tree.root()) {
            let record = NodeRecord::from_node(&tree, id).unwrap();
            let json = serde_json::to_string(&record).unwrap();
            let back: NodeRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(back, record);
            let node = back.to_node("k", &registry).unwrap();
            assert_eq!(node.signature(KeyLevel::Full), tree.get_signature(id, KeyLevel::Full));
        }
    }

    #[test]
    fn unknown_tag_is_a_registry_error() {
        let tree = tree();
        let leaf = tree.get_leaves(tree.root())[0];
        let mut record = NodeRecord::from_node(&tree, leaf).unwrap();
        record.kind = KindRecord::Estimator(TaggedState {
            tag: "Nope".into(),
            state: Value::Null,
        });
        assert!(matches!(
            record.to_node("k", &Registry::with_builtins()),
            Err(StoreError::Registry { .. })
        ));
    }

    /// Learns a table keyed by pairs, which JSON objects cannot hold.
    #[derive(Debug, Clone, Default)]
    struct PairTable {
        table: BTreeMap<(u8, u8), f64>,
    }

    impl Estimator for PairTable {
        fn type_tag(&self) -> &'static str {
            "PairTable"
        }

        fn params(&self) -> SignatureArgs {
            SignatureArgs::new()
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::PREDICTOR
        }

        fn fit(&mut self, _data: &DataFlow) -> Result<(), EstimatorError> {
            self.table.insert((0, 1), 1.0);
            Ok(())
        }

        fn state(&self) -> Result<Value, EstimatorError> {
            estimator::encode_state(&self.table)
        }

        fn clone_box(&self) -> Box<dyn Estimator> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn unencodable_state_is_reported() {
        let mut fitted = PairTable::default();
        fitted.fit(&DataFlow::new()).unwrap();
        let tree = Tree::build(&Workflow::estimator(fitted)).unwrap();
        let root = tree.root();
        match NodeRecord::from_node(&tree, root) {
            Err(StoreError::Encode { key, source }) => {
                assert_eq!(key, "PairTable");
                assert!(matches!(source, EstimatorError::InvalidState(_)));
            }
            other => panic!("expected Encode, got {other:?}"),
        }
    }
}
