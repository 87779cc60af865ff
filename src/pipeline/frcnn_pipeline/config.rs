use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::module::cntk_export::TruncationPolicy;
use crate::processing::bbox_regression::RegressionParameterization;
use crate::processing::roi_filter::FALLBACK_MARGIN;

pub const BACKGROUND_CLASS: &str = "__background__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectiveSearchConfig {
    pub scale: f32,
    pub sigma: f32,
    pub min_size: usize,
}

impl SelectiveSearchConfig {
    pub fn new() -> Self {
        SelectiveSearchConfig {
            scale: 100.0,
            sigma: 1.2,
            min_size: 20,
        }
    }
}

impl Default for SelectiveSearchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub nr_scales: u32,
    pub aspect_ratios: Vec<f32>,
}

impl GridConfig {
    pub fn new() -> Self {
        GridConfig {
            nr_scales: 7,
            aspect_ratios: vec![1.0, 2.0, 0.5],
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage 1 settings. Dimension and pixel-count bounds are relative to
/// `max_img_dim` (pixel counts to its square).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiGenerationConfig {
    pub max_img_dim: u32,
    pub upscale: bool,
    pub min_dim_rel: f32,
    pub max_dim_rel: f32,
    pub min_nr_pixels_rel: f32,
    pub max_nr_pixels_rel: f32,
    pub max_aspect_ratio: f32,
    pub add_selective_search_rois: bool,
    pub add_grid_rois: bool,
    pub selective_search: SelectiveSearchConfig,
    pub grid: GridConfig,
}

impl RoiGenerationConfig {
    pub fn new() -> Self {
        RoiGenerationConfig {
            max_img_dim: 200,
            upscale: true,
            min_dim_rel: 0.01,
            max_dim_rel: 1.0,
            min_nr_pixels_rel: 0.0,
            max_nr_pixels_rel: 1.0,
            max_aspect_ratio: 4.0,
            add_selective_search_rois: true,
            add_grid_rois: true,
            selective_search: SelectiveSearchConfig::new(),
            grid: GridConfig::new(),
        }
    }
}

impl Default for RoiGenerationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage 2 settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CntkExportConfig {
    pub pad_width: u32,
    pub pad_height: u32,
    pub nr_rois: usize,
    pub pos_overlap_thres: f32,
    pub regression: RegressionParameterization,
    pub truncation: TruncationPolicy,
}

impl CntkExportConfig {
    pub fn new() -> Self {
        CntkExportConfig {
            pad_width: 1000,
            pad_height: 1000,
            nr_rois: 2000,
            pos_overlap_thres: 0.5,
            regression: RegressionParameterization::Nonlinear,
            truncation: TruncationPolicy::KeepFirst,
        }
    }
}

impl Default for CntkExportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An image set ("train", "test") made of one or more image sub-directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSetConfig {
    pub name: String,
    pub sub_dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset_name: String,
    pub img_dir: PathBuf,
    pub roi_dir: PathBuf,
    pub cntk_files_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub image_extension: String,
    pub classes: Vec<String>,
    pub image_sets: Vec<ImageSetConfig>,
    pub skip_failed_images: bool,
    pub roi_generation: RoiGenerationConfig,
    pub export: CntkExportConfig,
}

impl PipelineConfig {
    /// new returns the settings of the grocery dataset.
    pub fn new() -> Self {
        let classes = [
            BACKGROUND_CLASS,
            "avocado",
            "orange",
            "butter",
            "champagne",
            "eggBox",
            "gerkin",
            "joghurt",
            "ketchup",
            "orangeJuice",
            "onion",
            "pepper",
            "tomato",
            "water",
            "milk",
            "tabasco",
            "mustard",
        ];
        PipelineConfig {
            dataset_name: "grocery".to_string(),
            img_dir: PathBuf::from("data/grocery"),
            roi_dir: PathBuf::from("proc/grocery/rois"),
            cntk_files_dir: PathBuf::from("proc/grocery/cntkFiles"),
            cache_dir: None,
            image_extension: "jpg".to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            image_sets: vec![
                ImageSetConfig {
                    name: "train".to_string(),
                    sub_dirs: vec!["positive".to_string(), "negative".to_string()],
                },
                ImageSetConfig {
                    name: "test".to_string(),
                    sub_dirs: vec!["testImages".to_string()],
                },
            ],
            skip_failed_images: false,
            roi_generation: RoiGenerationConfig::new(),
            export: CntkExportConfig::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: PipelineConfig = match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                return Err(Error::Json {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// class_index maps a class name to its label index.
    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == name)
    }

    /// sub_dirs lists every image sub-directory once, in image set order.
    pub fn sub_dirs(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for set in &self.image_sets {
            for dir in &set.sub_dirs {
                if !out.contains(dir) {
                    out.push(dir.clone());
                }
            }
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        if self.classes.first().map(String::as_str) != Some(BACKGROUND_CLASS) {
            return Err(Error::Config(format!(
                "first class must be {}",
                BACKGROUND_CLASS
            )));
        }
        if self.classes.len() < 2 {
            return Err(Error::Config("need at least one object class".to_string()));
        }
        if self.export.pad_width != self.export.pad_height {
            return Err(Error::Config(format!(
                "padded input must be square, got {}x{}",
                self.export.pad_width, self.export.pad_height
            )));
        }
        if self.export.nr_rois == 0 {
            return Err(Error::Config("nr_rois must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.export.pos_overlap_thres) {
            return Err(Error::Config(format!(
                "pos_overlap_thres {} outside [0, 1]",
                self.export.pos_overlap_thres
            )));
        }
        let gen = &self.roi_generation;
        if gen.max_img_dim as f32 <= 2.0 * FALLBACK_MARGIN {
            return Err(Error::Config(format!(
                "max_img_dim {} leaves no room for the {} pixel fallback margin",
                gen.max_img_dim, FALLBACK_MARGIN
            )));
        }
        if gen.max_aspect_ratio < 1.0 {
            return Err(Error::Config("max_aspect_ratio must be at least 1".to_string()));
        }
        if gen.min_dim_rel > gen.max_dim_rel || gen.min_nr_pixels_rel > gen.max_nr_pixels_rel {
            return Err(Error::Config("roi minimum bounds exceed maximum bounds".to_string()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
