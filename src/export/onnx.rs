//! ONNX export functionality
//!
//! Builds an in-memory graph description of a fitted pipeline and encodes
//! it as a binary `ModelProto`. The graph uses the `ai.onnx.ml` operators
//! `Scaler`, `LinearRegressor` and `TreeEnsembleRegressor`.

use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::proto::{
    self, tensor_shape_proto, AttributeProto, AttributeType, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, StringStringEntryProto, TensorShapeProto, TensorTypeProto, TypeProto,
    ValueInfoProto,
};
use crate::error::{DrytimeError, Result};
use crate::training::{Estimator, FittedPipeline, RandomForest, TreeNode};

/// Domain of the classical-ML operator set
pub const ML_DOMAIN: &str = "ai.onnx.ml";

/// ONNX configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ONNXConfig {
    /// IR version written into the model
    pub ir_version: i64,
    /// Default-domain opset version
    pub opset_version: i64,
    /// `ai.onnx.ml` opset version
    pub ml_opset_version: i64,
    /// Producer name
    pub producer_name: String,
    /// Producer version
    pub producer_version: String,
    /// Model description
    pub description: String,
    /// Graph input name
    pub input_name: String,
    /// Graph output name
    pub output_name: String,
}

impl Default for ONNXConfig {
    fn default() -> Self {
        Self {
            ir_version: 8,
            opset_version: 15,
            ml_opset_version: 3,
            producer_name: "drytime".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            description: String::new(),
            input_name: "input".to_string(),
            output_name: "variable".to_string(),
        }
    }
}

/// ONNX tensor shape dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    /// Fixed size dimension
    Fixed(i64),
    /// Dynamic dimension with name
    Dynamic(String),
}

/// Float tensor specification for graph inputs and outputs
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Dimension>,
}

impl TensorSpec {
    /// Float tensor of shape `[batch, width]`
    pub fn batch(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            shape: vec![Dimension::Dynamic("N".to_string()), Dimension::Fixed(width as i64)],
        }
    }

    fn to_proto(&self) -> ValueInfoProto {
        let dim = self
            .shape
            .iter()
            .map(|d| tensor_shape_proto::Dimension {
                value: Some(match d {
                    Dimension::Fixed(n) => tensor_shape_proto::dimension::Value::DimValue(*n),
                    Dimension::Dynamic(s) => {
                        tensor_shape_proto::dimension::Value::DimParam(s.clone())
                    }
                }),
                denotation: String::new(),
            })
            .collect();
        ValueInfoProto {
            name: self.name.clone(),
            r#type: Some(TypeProto {
                tensor_type: Some(TensorTypeProto {
                    elem_type: proto::ELEM_TYPE_FLOAT,
                    shape: Some(TensorShapeProto { dim }),
                }),
            }),
            doc_string: String::new(),
        }
    }
}

/// ONNX attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum ONNXAttribute {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl ONNXAttribute {
    fn to_proto(&self, name: &str) -> AttributeProto {
        let mut attr = AttributeProto {
            name: name.to_string(),
            ..Default::default()
        };
        match self {
            ONNXAttribute::Int(v) => {
                attr.i = *v;
                attr.r#type = AttributeType::Int as i32;
            }
            ONNXAttribute::Float(v) => {
                attr.f = *v;
                attr.r#type = AttributeType::Float as i32;
            }
            ONNXAttribute::String(v) => {
                attr.s = v.as_bytes().to_vec();
                attr.r#type = AttributeType::String as i32;
            }
            ONNXAttribute::Ints(v) => {
                attr.ints = v.clone();
                attr.r#type = AttributeType::Ints as i32;
            }
            ONNXAttribute::Floats(v) => {
                attr.floats = v.clone();
                attr.r#type = AttributeType::Floats as i32;
            }
            ONNXAttribute::Strings(v) => {
                attr.strings = v.iter().map(|s| s.as_bytes().to_vec()).collect();
                attr.r#type = AttributeType::Strings as i32;
            }
        }
        attr
    }
}

/// ONNX operator node
#[derive(Debug, Clone)]
pub struct ONNXNode {
    /// Node name
    pub name: String,
    /// Operator type (e.g., "Scaler", "LinearRegressor")
    pub op_type: String,
    /// Operator domain (empty for the default domain)
    pub domain: String,
    /// Input tensor names
    pub inputs: Vec<String>,
    /// Output tensor names
    pub outputs: Vec<String>,
    /// Attributes, encoded in name order
    pub attributes: BTreeMap<String, ONNXAttribute>,
}

impl ONNXNode {
    /// Create new node
    pub fn new(
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            inputs,
            outputs,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Add attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: ONNXAttribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn to_proto(&self) -> NodeProto {
        NodeProto {
            input: self.inputs.clone(),
            output: self.outputs.clone(),
            name: self.name.clone(),
            op_type: self.op_type.clone(),
            attribute: self
                .attributes
                .iter()
                .map(|(name, value)| value.to_proto(name))
                .collect(),
            doc_string: String::new(),
            domain: self.domain.clone(),
        }
    }
}

/// ONNX graph representation
#[derive(Debug, Clone)]
pub struct ONNXGraph {
    /// Graph name
    pub name: String,
    /// Input tensors
    pub inputs: Vec<TensorSpec>,
    /// Output tensors
    pub outputs: Vec<TensorSpec>,
    /// Nodes in execution order
    pub nodes: Vec<ONNXNode>,
}

impl ONNXGraph {
    /// Create new graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Add input
    pub fn add_input(mut self, spec: TensorSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Add output
    pub fn add_output(mut self, spec: TensorSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Add node
    pub fn add_node(mut self, node: ONNXNode) -> Self {
        self.nodes.push(node);
        self
    }

    fn to_proto(&self, doc_string: &str) -> GraphProto {
        GraphProto {
            node: self.nodes.iter().map(ONNXNode::to_proto).collect(),
            name: self.name.clone(),
            doc_string: doc_string.to_string(),
            input: self.inputs.iter().map(TensorSpec::to_proto).collect(),
            output: self.outputs.iter().map(TensorSpec::to_proto).collect(),
        }
    }
}

/// Trait for models that can be exported to ONNX
pub trait ONNXExportable {
    /// Convert model to ONNX graph
    fn to_onnx_graph(&self, config: &ONNXConfig) -> Result<ONNXGraph>;
}

/// ONNX model exporter
#[derive(Debug, Clone, Default)]
pub struct ONNXExporter {
    config: ONNXConfig,
}

impl ONNXExporter {
    /// Create new exporter with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom config
    pub fn with_config(config: ONNXConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ONNXConfig {
        &self.config
    }

    /// Assemble the `ModelProto` for a model, attaching `metadata` as model properties
    pub fn to_model_proto<M: ONNXExportable>(
        &self,
        model: &M,
        metadata: &[(String, String)],
    ) -> Result<ModelProto> {
        let graph = model.to_onnx_graph(&self.config)?;
        Ok(ModelProto {
            ir_version: self.config.ir_version,
            producer_name: self.config.producer_name.clone(),
            producer_version: self.config.producer_version.clone(),
            domain: String::new(),
            model_version: 1,
            doc_string: self.config.description.clone(),
            graph: Some(graph.to_proto(&self.config.description)),
            opset_import: vec![
                OperatorSetIdProto {
                    domain: String::new(),
                    version: self.config.opset_version,
                },
                OperatorSetIdProto {
                    domain: ML_DOMAIN.to_string(),
                    version: self.config.ml_opset_version,
                },
            ],
            metadata_props: metadata
                .iter()
                .map(|(key, value)| StringStringEntryProto {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        })
    }

    /// Encode a model as ONNX protobuf bytes
    pub fn export_bytes<M: ONNXExportable>(
        &self,
        model: &M,
        metadata: &[(String, String)],
    ) -> Result<Vec<u8>> {
        Ok(self.to_model_proto(model, metadata)?.encode_to_vec())
    }
}

fn to_f32(values: impl IntoIterator<Item = f64>) -> Vec<f32> {
    values.into_iter().map(|v| v as f32).collect()
}

/// Flattened node arrays of a `TreeEnsembleRegressor`
#[derive(Debug, Default)]
struct TreeEnsembleArrays {
    tree_ids: Vec<i64>,
    node_ids: Vec<i64>,
    feature_ids: Vec<i64>,
    values: Vec<f32>,
    modes: Vec<String>,
    true_ids: Vec<i64>,
    false_ids: Vec<i64>,
    target_tree_ids: Vec<i64>,
    target_node_ids: Vec<i64>,
    target_weights: Vec<f32>,
}

impl TreeEnsembleArrays {
    /// Pre-order numbering, root is node 0
    fn push_tree(&mut self, tree_id: i64, node: &TreeNode, next_id: &mut i64) -> i64 {
        let id = *next_id;
        *next_id += 1;
        let slot = self.node_ids.len();

        self.tree_ids.push(tree_id);
        self.node_ids.push(id);
        match node {
            TreeNode::Leaf { value, .. } => {
                self.feature_ids.push(0);
                self.values.push(0.0);
                self.modes.push("LEAF".to_string());
                self.true_ids.push(0);
                self.false_ids.push(0);
                self.target_tree_ids.push(tree_id);
                self.target_node_ids.push(id);
                self.target_weights.push(*value as f32);
            }
            TreeNode::Split {
                feature_idx,
                threshold,
                left,
                right,
                ..
            } => {
                self.feature_ids.push(*feature_idx as i64);
                self.values.push(*threshold);
                self.modes.push("BRANCH_LEQ".to_string());
                self.true_ids.push(0);
                self.false_ids.push(0);
                let left_id = self.push_tree(tree_id, left, next_id);
                let right_id = self.push_tree(tree_id, right, next_id);
                self.true_ids[slot] = left_id;
                self.false_ids[slot] = right_id;
            }
        }
        id
    }
}

fn forest_node(forest: &RandomForest, input: &str, output: &str) -> Result<ONNXNode> {
    let mut arrays = TreeEnsembleArrays::default();
    for (tree_id, tree) in forest.trees().iter().enumerate() {
        let root = tree.root().ok_or(DrytimeError::ModelNotFitted)?;
        let mut next_id = 0;
        arrays.push_tree(tree_id as i64, root, &mut next_id);
    }
    if arrays.tree_ids.is_empty() {
        return Err(DrytimeError::ModelNotFitted);
    }
    let n_leaves = arrays.target_node_ids.len();

    Ok(ONNXNode::new(
        "TreeEnsembleRegressor",
        "TreeEnsembleRegressor",
        vec![input.to_string()],
        vec![output.to_string()],
    )
    .with_domain(ML_DOMAIN)
    .with_attribute("n_targets", ONNXAttribute::Int(1))
    .with_attribute("aggregate_function", ONNXAttribute::String("AVERAGE".to_string()))
    .with_attribute("post_transform", ONNXAttribute::String("NONE".to_string()))
    .with_attribute("nodes_treeids", ONNXAttribute::Ints(arrays.tree_ids))
    .with_attribute("nodes_nodeids", ONNXAttribute::Ints(arrays.node_ids))
    .with_attribute("nodes_featureids", ONNXAttribute::Ints(arrays.feature_ids))
    .with_attribute("nodes_values", ONNXAttribute::Floats(arrays.values))
    .with_attribute("nodes_modes", ONNXAttribute::Strings(arrays.modes))
    .with_attribute("nodes_truenodeids", ONNXAttribute::Ints(arrays.true_ids))
    .with_attribute("nodes_falsenodeids", ONNXAttribute::Ints(arrays.false_ids))
    .with_attribute("target_treeids", ONNXAttribute::Ints(arrays.target_tree_ids))
    .with_attribute("target_nodeids", ONNXAttribute::Ints(arrays.target_node_ids))
    .with_attribute("target_ids", ONNXAttribute::Ints(vec![0; n_leaves]))
    .with_attribute("target_weights", ONNXAttribute::Floats(arrays.target_weights)))
}

impl ONNXExportable for FittedPipeline {
    fn to_onnx_graph(&self, config: &ONNXConfig) -> Result<ONNXGraph> {
        let (offset, factor) = self.scaler.single_precision_params()?;
        let n_features = offset.len();
        let scaled = "scaled_input";

        let scaler = ONNXNode::new(
            "Scaler",
            "Scaler",
            vec![config.input_name.clone()],
            vec![scaled.to_string()],
        )
        .with_domain(ML_DOMAIN)
        .with_attribute("offset", ONNXAttribute::Floats(offset))
        .with_attribute("scale", ONNXAttribute::Floats(factor));

        let regressor = match &self.estimator {
            Estimator::Ridge(model) => {
                let (coefficients, intercept) = model.params()?;
                ONNXNode::new(
                    "LinearRegressor",
                    "LinearRegressor",
                    vec![scaled.to_string()],
                    vec![config.output_name.clone()],
                )
                .with_domain(ML_DOMAIN)
                .with_attribute(
                    "coefficients",
                    ONNXAttribute::Floats(to_f32(coefficients.iter().copied())),
                )
                .with_attribute("intercepts", ONNXAttribute::Floats(vec![intercept as f32]))
                .with_attribute("targets", ONNXAttribute::Int(1))
                .with_attribute("post_transform", ONNXAttribute::String("NONE".to_string()))
            }
            Estimator::Forest(forest) => forest_node(forest, scaled, &config.output_name)?,
        };

        Ok(ONNXGraph::new("minutes_to_dry")
            .add_input(TensorSpec::batch(config.input_name.clone(), n_features))
            .add_output(TensorSpec::batch(config.output_name.clone(), 1))
            .add_node(scaler)
            .add_node(regressor))
    }
}
