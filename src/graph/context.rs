use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::graph::ndl::{render_ndl, FEATURE_DIMENSION, LABEL_DIMENSION};
use crate::graph::node::{Graph, InputRole, NodeId};
use crate::utils::utils::make_directory;

pub const NETWORK_DESCRIPTION: &str = "$NetworkDescription$";
pub const CONFIG_FILE_NAME: &str = "model.cntk";

/// GraphContext owns the working directory a network configuration is
/// written into.
#[derive(Debug, Clone)]
pub struct GraphContext {
    directory: PathBuf,
}

impl GraphContext {
    /// create prepares `<base_dir>/_cntk_<name>`. An existing directory is
    /// reused and its files overwritten.
    pub fn create(base_dir: &Path, name: &str) -> Result<Self> {
        let directory = base_dir.join(format!("_cntk_{}", name));
        if directory.exists() {
            info!(dir = %directory.display(), "directory already exists, overwriting data");
        } else {
            make_directory(&directory)?;
        }
        Ok(GraphContext { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// render_config fills the template placeholders with the network
    /// description of `outputs` and the input dimensions.
    pub fn render_config(&self, template: &str, graph: &Graph, outputs: &[NodeId]) -> Result<String> {
        let ndl = render_ndl(graph, outputs)?;
        let feature_dim = match graph.input_dimension(InputRole::Features) {
            Some(dim) => dim,
            None => return Err(Error::Graph("graph has no feature input".to_string())),
        };

        let mut config = template
            .replace(NETWORK_DESCRIPTION, &ndl)
            .replace(FEATURE_DIMENSION, &feature_dim.to_string());
        if let Some(label_dim) = graph.input_dimension(InputRole::Labels) {
            config = config.replace(LABEL_DIMENSION, &label_dim.to_string());
        }
        Ok(config)
    }

    /// write_config renders the configuration and writes it to
    /// `model.cntk` inside the working directory.
    pub fn write_config(&self, template: &str, graph: &Graph, outputs: &[NodeId]) -> Result<PathBuf> {
        let config = self.render_config(template, graph, outputs)?;
        let path = self.directory.join(CONFIG_FILE_NAME);
        fs::write(&path, config).map_err(|e| Error::io(&path, e))?;
        info!(path = %path.display(), "network configuration written");
        Ok(path)
    }
}
