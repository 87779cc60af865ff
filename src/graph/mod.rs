pub mod context;
pub mod ndl;
pub mod node;

pub use context::GraphContext;
pub use ndl::render_ndl;
pub use node::{Graph, InputRole, Node, NodeId, OpKind, Shape};
