use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::graph::node::{Graph, InputRole, Node, NodeId, OpKind};

pub const FEATURE_DIMENSION: &str = "$FeatureDimension$";
pub const LABEL_DIMENSION: &str = "$LabelDimension$";

fn reachable(graph: &Graph, outputs: &[NodeId]) -> Result<BTreeSet<NodeId>> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<NodeId> = outputs.to_vec();
    while let Some(id) = stack.pop() {
        if id >= graph.len() {
            return Err(Error::Graph(format!("unknown node {}", id)));
        }
        if !seen.insert(id) {
            continue;
        }
        if let Node::Operator { args, .. } = graph.node(id) {
            stack.extend(args.iter().copied());
        }
    }
    Ok(seen)
}

fn render_node(graph: &Graph, id: NodeId) -> Result<String> {
    let expr = match graph.node(id) {
        Node::Input { role, .. } => match role {
            InputRole::Features => format!("Input({})", FEATURE_DIMENSION),
            InputRole::Labels => format!("Input({})", LABEL_DIMENSION),
        },
        Node::Parameter { value } => match value.shape() {
            [cols] => format!("LearnableParameter({})", cols),
            [cols, rows] => format!("LearnableParameter({}, {})", rows, cols),
            shape => {
                return Err(Error::Graph(format!(
                    "parameter {} has unsupported rank {}",
                    graph.name(id),
                    shape.len()
                )))
            }
        },
        Node::Operator { op, args } => {
            let names: Vec<String> = args.iter().map(|&a| graph.name(a)).collect();
            match op {
                // column-major trainer: x * W is written W * x
                OpKind::Times => format!("Times({}, {})", names[1], names[0]),
                OpKind::Plus => format!("Plus({}, {})", names[0], names[1]),
                OpKind::Softmax => format!("Softmax({})", names[0]),
                OpKind::Divide | OpKind::ArgMax { .. } | OpKind::Equal => {
                    return Err(Error::Graph(format!(
                        "operator {:?} has no network description form",
                        op
                    )))
                }
            }
        }
    };
    Ok(format!("{} = {}", graph.name(id), expr))
}

/// render_ndl writes the network description of everything `outputs`
/// depends on, one assignment per line in creation order, followed by the
/// feature, label and output node lists.
pub fn render_ndl(graph: &Graph, outputs: &[NodeId]) -> Result<String> {
    if outputs.is_empty() {
        return Err(Error::Graph("no output nodes given".to_string()));
    }
    let nodes = reachable(graph, outputs)?;

    let mut lines = Vec::with_capacity(nodes.len() + 3);
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for &id in &nodes {
        lines.push(render_node(graph, id)?);
        if let Node::Input { role, .. } = graph.node(id) {
            match role {
                InputRole::Features => features.push(graph.name(id)),
                InputRole::Labels => labels.push(graph.name(id)),
            }
        }
    }

    lines.push(format!("FeatureNodes = ({})", features.join(", ")));
    if !labels.is_empty() {
        lines.push(format!("LabelNodes = ({})", labels.join(", ")));
    }
    let output_names: Vec<String> = outputs.iter().map(|&id| graph.name(id)).collect();
    lines.push(format!("OutputNodes = ({})", output_names.join(", ")));

    let mut ndl = lines.join("\n");
    ndl.push('\n');
    Ok(ndl)
}
