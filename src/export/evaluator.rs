//! Reference evaluator for exported graphs
//!
//! Decodes a `ModelProto` and executes the `Scaler` →
//! `LinearRegressor` | `TreeEnsembleRegressor` chain in `f32`, the way an
//! ONNX runtime would. Used to verify artifacts offline.

use ndarray::{Array1, Array2};
use prost::Message;
use std::collections::HashMap;

use super::proto::{tensor_shape_proto, AttributeProto, ModelProto, NodeProto};
use crate::error::{DrytimeError, Result};

#[derive(Debug, Clone)]
struct ScalerOp {
    offset: Vec<f32>,
    scale: Vec<f32>,
}

#[derive(Debug, Clone)]
struct LinearOp {
    coefficients: Vec<f32>,
    intercept: f32,
}

#[derive(Debug, Clone)]
enum EnsembleNode {
    Branch {
        feature: usize,
        value: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        weight: f32,
    },
}

#[derive(Debug, Clone)]
struct EnsembleOp {
    /// Per tree: nodes indexed by position and the root position
    trees: Vec<(Vec<EnsembleNode>, usize)>,
    average: bool,
}

#[derive(Debug, Clone)]
enum RegressorOp {
    Linear(LinearOp),
    Ensemble(EnsembleOp),
}

/// A decoded model ready for evaluation
#[derive(Debug, Clone)]
pub struct OnnxModel {
    n_features: usize,
    scaler: Option<ScalerOp>,
    regressor: RegressorOp,
    metadata: HashMap<String, String>,
}

fn export_err(msg: impl Into<String>) -> DrytimeError {
    DrytimeError::Export(msg.into())
}

fn attr<'a>(node: &'a NodeProto, name: &str) -> Result<&'a AttributeProto> {
    node.attribute
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| export_err(format!("{} is missing attribute '{}'", node.op_type, name)))
}

fn attr_string(node: &NodeProto, name: &str) -> Result<String> {
    Ok(String::from_utf8_lossy(&attr(node, name)?.s).into_owned())
}

impl ScalerOp {
    fn from_node(node: &NodeProto) -> Result<Self> {
        let offset = attr(node, "offset")?.floats.clone();
        let scale = attr(node, "scale")?.floats.clone();
        if offset.len() != scale.len() {
            return Err(export_err("Scaler offset and scale differ in length"));
        }
        Ok(Self { offset, scale })
    }
}

impl LinearOp {
    fn from_node(node: &NodeProto) -> Result<Self> {
        let coefficients = attr(node, "coefficients")?.floats.clone();
        let intercept = attr(node, "intercepts")
            .map(|a| a.floats.first().copied().unwrap_or(0.0))
            .unwrap_or(0.0);
        Ok(Self {
            coefficients,
            intercept,
        })
    }
}

impl EnsembleOp {
    fn from_node(node: &NodeProto) -> Result<Self> {
        let tree_ids = &attr(node, "nodes_treeids")?.ints;
        let node_ids = &attr(node, "nodes_nodeids")?.ints;
        let feature_ids = &attr(node, "nodes_featureids")?.ints;
        let values = &attr(node, "nodes_values")?.floats;
        let modes = &attr(node, "nodes_modes")?.strings;
        let true_ids = &attr(node, "nodes_truenodeids")?.ints;
        let false_ids = &attr(node, "nodes_falsenodeids")?.ints;
        let target_tree_ids = &attr(node, "target_treeids")?.ints;
        let target_node_ids = &attr(node, "target_nodeids")?.ints;
        let target_weights = &attr(node, "target_weights")?.floats;

        let n = tree_ids.len();
        let lengths = [
            node_ids.len(),
            feature_ids.len(),
            values.len(),
            modes.len(),
            true_ids.len(),
            false_ids.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(export_err("TreeEnsembleRegressor node arrays differ in length"));
        }
        if target_node_ids.len() != target_tree_ids.len()
            || target_weights.len() != target_tree_ids.len()
        {
            return Err(export_err("TreeEnsembleRegressor target arrays differ in length"));
        }

        let weights: HashMap<(i64, i64), f32> = target_tree_ids
            .iter()
            .zip(target_node_ids)
            .zip(target_weights)
            .map(|((&t, &n), &w)| ((t, n), w))
            .collect();

        // group by tree id, keeping first-seen tree order
        let mut order: Vec<i64> = Vec::new();
        let mut members: HashMap<i64, Vec<usize>> = HashMap::new();
        for (pos, &tree) in tree_ids.iter().enumerate() {
            members
                .entry(tree)
                .or_insert_with(|| {
                    order.push(tree);
                    Vec::new()
                })
                .push(pos);
        }

        let mut trees = Vec::with_capacity(order.len());
        for tree in order {
            let positions = &members[&tree];
            let local: HashMap<i64, usize> = positions
                .iter()
                .enumerate()
                .map(|(i, &pos)| (node_ids[pos], i))
                .collect();
            let lookup = |id: i64| {
                local.get(&id).copied().ok_or_else(|| {
                    export_err(format!("tree {} references unknown node {}", tree, id))
                })
            };

            let mut nodes = Vec::with_capacity(positions.len());
            for &pos in positions {
                let node = match modes[pos].as_slice() {
                    b"LEAF" => EnsembleNode::Leaf {
                        weight: weights.get(&(tree, node_ids[pos])).copied().unwrap_or(0.0),
                    },
                    b"BRANCH_LEQ" => EnsembleNode::Branch {
                        feature: feature_ids[pos] as usize,
                        value: values[pos],
                        left: lookup(true_ids[pos])?,
                        right: lookup(false_ids[pos])?,
                    },
                    other => {
                        return Err(export_err(format!(
                            "unsupported node mode '{}'",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                nodes.push(node);
            }

            let root_id = positions.iter().map(|&pos| node_ids[pos]).min().unwrap_or(0);
            trees.push((nodes, lookup(root_id)?));
        }

        let average = match attr_string(node, "aggregate_function") {
            Ok(f) => f == "AVERAGE",
            Err(_) => false,
        };
        Ok(Self { trees, average })
    }

    fn predict_row(&self, row: &[f32]) -> Result<f32> {
        let mut total = 0.0f32;
        for (nodes, root) in &self.trees {
            let mut idx = *root;
            // a well-formed tree reaches a leaf within nodes.len() steps
            let mut steps = 0;
            loop {
                match &nodes[idx] {
                    EnsembleNode::Leaf { weight } => {
                        total += weight;
                        break;
                    }
                    EnsembleNode::Branch {
                        feature,
                        value,
                        left,
                        right,
                    } => {
                        let x = row.get(*feature).copied().ok_or_else(|| {
                            export_err(format!("feature index {} out of range", feature))
                        })?;
                        idx = if x <= *value { *left } else { *right };
                    }
                }
                steps += 1;
                if steps > nodes.len() {
                    return Err(export_err("tree contains a cycle"));
                }
            }
        }
        if self.average && !self.trees.is_empty() {
            total /= self.trees.len() as f32;
        }
        Ok(total)
    }
}

impl OnnxModel {
    /// Decode ONNX protobuf bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model = ModelProto::decode(bytes)?;
        Self::from_proto(&model)
    }

    pub fn from_proto(model: &ModelProto) -> Result<Self> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| export_err("model has no graph"))?;

        let n_features = graph
            .input
            .first()
            .and_then(|input| input.r#type.as_ref())
            .and_then(|t| t.tensor_type.as_ref())
            .and_then(|t| t.shape.as_ref())
            .and_then(|s| s.dim.get(1))
            .and_then(|d| match d.value {
                Some(tensor_shape_proto::dimension::Value::DimValue(v)) => Some(v as usize),
                _ => None,
            })
            .ok_or_else(|| export_err("graph input has no fixed feature dimension"))?;

        let mut scaler = None;
        let mut regressor = None;
        for node in &graph.node {
            match node.op_type.as_str() {
                "Scaler" => scaler = Some(ScalerOp::from_node(node)?),
                "LinearRegressor" => {
                    regressor = Some(RegressorOp::Linear(LinearOp::from_node(node)?))
                }
                "TreeEnsembleRegressor" => {
                    regressor = Some(RegressorOp::Ensemble(EnsembleOp::from_node(node)?))
                }
                other => return Err(export_err(format!("unsupported operator '{}'", other))),
            }
        }
        let regressor = regressor.ok_or_else(|| export_err("graph has no regressor node"))?;

        let metadata = model
            .metadata_props
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect();

        Ok(Self {
            n_features,
            scaler,
            regressor,
            metadata,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Model metadata properties
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Evaluate the graph on `x`, computing in `f32`
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(DrytimeError::Shape {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut out = Vec::with_capacity(x.nrows());
        let mut buf = vec![0.0f32; self.n_features];
        for row in x.rows() {
            for (j, v) in row.iter().enumerate() {
                buf[j] = *v as f32;
            }
            if let Some(scaler) = &self.scaler {
                for (j, v) in buf.iter_mut().enumerate() {
                    let offset = scaler.offset.get(j).copied().unwrap_or(0.0);
                    let scale = scaler.scale.get(j).copied().unwrap_or(1.0);
                    *v = (*v - offset) * scale;
                }
            }
            let y = match &self.regressor {
                RegressorOp::Linear(op) => {
                    op.intercept
                        + op
                            .coefficients
                            .iter()
                            .zip(buf.iter())
                            .map(|(c, v)| c * v)
                            .sum::<f32>()
                }
                RegressorOp::Ensemble(op) => op.predict_row(&buf)?,
            };
            out.push(y as f64);
        }
        Ok(Array1::from(out))
    }
}
