pub mod frcnn_pipeline;
pub mod module;
