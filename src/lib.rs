pub mod dataset;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod processing;
pub mod rcnn;
pub mod utils;

pub use error::{Error, Result};
