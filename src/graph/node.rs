use ndarray::ArrayD;

use crate::error::{Error, Result};

pub type NodeId = usize;

/// Tensor shape; `None` marks the dynamic (batch) dimension.
pub type Shape = Vec<Option<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Features,
    Labels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Plus,
    Times,
    Divide,
    Softmax,
    ArgMax { axis: usize },
    Equal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Input { shape: Shape, role: InputRole },
    Parameter { value: ArrayD<f32> },
    Operator { op: OpKind, args: Vec<NodeId> },
}

fn fmt_shape(shape: &Shape) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|d| d.map_or("?".to_string(), |d| d.to_string()))
        .collect();
    format!("({})", dims.join(", "))
}

/// plus_check accepts equal shapes, or a `(batch, n)` matrix plus an `n`
/// bias vector.
pub fn plus_check(a: &Shape, b: &Shape) -> bool {
    if a.len() == 2 && a[0].is_none() && b.len() == 1 && a[1] == b[0] {
        return true;
    }
    a == b
}

pub fn times_check(a: &Shape, b: &Shape) -> bool {
    a.len() == 2 && b.len() == 2 && a[1].is_some() && a[1] == b[0]
}

/// infer_shape validates the argument shapes of `op` and returns the shape
/// of its result.
pub fn infer_shape(op: OpKind, args: &[Shape]) -> Result<Shape> {
    let expected = match op {
        OpKind::Softmax | OpKind::ArgMax { .. } => 1,
        _ => 2,
    };
    if args.len() != expected {
        return Err(Error::Graph(format!(
            "{:?} takes {} arguments, got {}",
            op,
            expected,
            args.len()
        )));
    }

    match op {
        OpKind::Plus => {
            if !plus_check(&args[0], &args[1]) {
                return Err(Error::Graph(format!(
                    "cannot add shapes {} and {}",
                    fmt_shape(&args[0]),
                    fmt_shape(&args[1])
                )));
            }
            Ok(args[0].clone())
        }
        OpKind::Times => {
            if !times_check(&args[0], &args[1]) {
                return Err(Error::Graph(format!(
                    "cannot multiply shapes {} and {}",
                    fmt_shape(&args[0]),
                    fmt_shape(&args[1])
                )));
            }
            Ok(vec![args[0][0], args[1][1]])
        }
        OpKind::ArgMax { axis } => {
            if axis >= args[0].len() {
                return Err(Error::Graph(format!(
                    "argmax axis {} out of range for shape {}",
                    axis,
                    fmt_shape(&args[0])
                )));
            }
            let mut shape = args[0].clone();
            shape.remove(axis);
            Ok(shape)
        }
        OpKind::Divide | OpKind::Softmax | OpKind::Equal => Ok(args[0].clone()),
    }
}

/// Graph is an append-only arena of nodes. Operators can only refer to
/// nodes created before them, so node order is a valid evaluation order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    names: Vec<Option<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    fn push(&mut self, node: Node, name: Option<String>) -> NodeId {
        self.nodes.push(node);
        self.names.push(name);
        self.nodes.len() - 1
    }

    /// placeholder declares the feature input.
    pub fn placeholder(&mut self, shape: Shape) -> NodeId {
        self.push(
            Node::Input {
                shape,
                role: InputRole::Features,
            },
            Some("features".to_string()),
        )
    }

    pub fn labels(&mut self, shape: Shape) -> NodeId {
        self.push(
            Node::Input {
                shape,
                role: InputRole::Labels,
            },
            Some("labels".to_string()),
        )
    }

    /// variable declares a learnable parameter initialised with `value`.
    pub fn variable(&mut self, value: ArrayD<f32>) -> NodeId {
        self.push(Node::Parameter { value }, None)
    }

    fn operator(&mut self, op: OpKind, args: Vec<NodeId>) -> Result<NodeId> {
        let mut shapes = Vec::with_capacity(args.len());
        for &arg in &args {
            if arg >= self.nodes.len() {
                return Err(Error::Graph(format!("unknown node {}", arg)));
            }
            shapes.push(self.output_shape(arg));
        }
        infer_shape(op, &shapes)?;
        Ok(self.push(Node::Operator { op, args }, None))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.operator(OpKind::Plus, vec![a, b])
    }

    pub fn times(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.operator(OpKind::Times, vec![a, b])
    }

    pub fn divide(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.operator(OpKind::Divide, vec![a, b])
    }

    pub fn softmax(&mut self, x: NodeId) -> Result<NodeId> {
        self.operator(OpKind::Softmax, vec![x])
    }

    pub fn argmax(&mut self, x: NodeId, axis: usize) -> Result<NodeId> {
        self.operator(OpKind::ArgMax { axis }, vec![x])
    }

    pub fn equal(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.operator(OpKind::Equal, vec![a, b])
    }

    pub fn set_name(&mut self, id: NodeId, name: &str) {
        self.names[id] = Some(name.to_string());
    }

    /// name returns the configuration variable name of a node.
    pub fn name(&self, id: NodeId) -> String {
        match &self.names[id] {
            Some(name) => name.clone(),
            None => format!("v{}", id),
        }
    }

    /// output_shape walks the arguments of `id`. Shapes were validated when
    /// the operators were created, so inference cannot fail here.
    pub fn output_shape(&self, id: NodeId) -> Shape {
        match &self.nodes[id] {
            Node::Input { shape, .. } => shape.clone(),
            Node::Parameter { value } => value.shape().iter().map(|&d| Some(d)).collect(),
            Node::Operator { op, args } => {
                let shapes: Vec<Shape> = args.iter().map(|&a| self.output_shape(a)).collect();
                infer_shape(*op, &shapes).unwrap_or_default()
            }
        }
    }

    /// input_dimension is the last dimension of the input with `role`.
    pub fn input_dimension(&self, role: InputRole) -> Option<usize> {
        self.nodes.iter().find_map(|node| match node {
            Node::Input { shape, role: r } if *r == role => shape.last().copied().flatten(),
            _ => None,
        })
    }
}
