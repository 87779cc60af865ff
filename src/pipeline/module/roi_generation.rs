use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::frcnn_pipeline::config::RoiGenerationConfig;
use crate::processing::roi_filter::RoiFilter;
use crate::processing::selective_search::{RegionProposer, SelectiveSearch};
use crate::rcnn::bbox::Rect;
use crate::rcnn::grid::grid_rois;
use crate::utils::utils::{load_image, resize_max_dim};

/// Candidate rois of one image, in original image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRois {
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub rois: Vec<Rect>,
}

pub struct RoiGeneration {
    config: RoiGenerationConfig,
    filter: RoiFilter,
    proposer: Box<dyn RegionProposer>,
}

impl RoiGeneration {
    /// new creates a generator backed by selective search.
    pub fn new(config: &RoiGenerationConfig) -> Self {
        let ss = &config.selective_search;
        Self::with_proposer(
            config,
            Box::new(SelectiveSearch::new(ss.scale, ss.sigma, ss.min_size)),
        )
    }

    pub fn with_proposer(config: &RoiGenerationConfig, proposer: Box<dyn RegionProposer>) -> Self {
        let filter = RoiFilter::from_relative(
            config.max_img_dim as f32,
            config.min_nr_pixels_rel,
            config.max_nr_pixels_rel,
            config.min_dim_rel,
            config.max_dim_rel,
            config.max_aspect_ratio,
        );
        RoiGeneration {
            config: config.clone(),
            filter,
            proposer,
        }
    }

    pub fn call(&self, image_path: &Path) -> Result<ImageRois> {
        let img = load_image(image_path)?;
        self.call_image(image_path, &img)
    }

    /// call_image proposes, filters and rescales the rois of a decoded
    /// image. The result is never empty and always inside the image.
    pub fn call_image(&self, image_path: &Path, img: &RgbImage) -> Result<ImageRois> {
        let start = Instant::now();
        let (width, height) = img.dimensions();
        let (resized, scale) = resize_max_dim(img, self.config.max_img_dim, self.config.upscale);
        let (img_w, img_h) = resized.dimensions();

        let mut rects = if self.config.add_selective_search_rois {
            let rects = self.proposer.propose(&resized)?;
            debug!(count = rects.len(), "selective search rois");
            rects
        } else {
            vec![]
        };

        if self.config.add_grid_rois {
            let grid = grid_rois(
                img_w,
                img_h,
                self.config.grid.nr_scales,
                &self.config.grid.aspect_ratios,
            );
            debug!(count = grid.len(), "grid rois");
            rects.extend(grid);
        }

        let filtered = self
            .filter
            .filter_or_fallback(&rects, img_w as f32, img_h as f32);
        debug!(
            before = rects.len(),
            after = filtered.len(),
            "filtered rois"
        );

        let rois = to_original_frame(&filtered, scale);
        check_bounds(image_path, &rois, width, height)?;

        debug!(
            image = %image_path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generated rois"
        );
        Ok(ImageRois {
            image_path: image_path.to_path_buf(),
            width,
            height,
            scale,
            rois,
        })
    }
}

/// to_original_frame undoes the resize and drops fractional pixels.
pub fn to_original_frame(rois: &[Rect], scale: f32) -> Vec<Rect> {
    rois.iter().map(|r| r.scale(1.0 / scale).trunc()).collect()
}

/// check_bounds fails when a roi leaves the `width x height` image.
pub fn check_bounds(image_path: &Path, rois: &[Rect], width: u32, height: u32) -> Result<()> {
    let (w, h) = (width as f32, height as f32);
    for roi in rois {
        let inside = roi.x1 >= 0.0
            && roi.y1 >= 0.0
            && roi.x2 >= 0.0
            && roi.y2 >= 0.0
            && roi.x1 < w
            && roi.x2 < w
            && roi.y1 < h
            && roi.y2 < h;
        if !inside {
            return Err(Error::RoiOutOfBounds {
                image: image_path.to_path_buf(),
                rect: roi.to_array(),
                width: w,
                height: h,
            });
        }
    }
    Ok(())
}

/// write_roi_file stores one `x1 y1 x2 y2` integer line per roi.
pub fn write_roi_file(path: &Path, rois: &[Rect]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
    for roi in rois {
        writeln!(
            file,
            "{} {} {} {}",
            roi.x1 as i64, roi.y1 as i64, roi.x2 as i64, roi.y2 as i64
        )
        .map_err(|e| Error::io(path, e))?;
    }
    Ok(())
}

pub fn read_roi_file(path: &Path) -> Result<Vec<Rect>> {
    let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut rois = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<f32> = match line
            .split_whitespace()
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(values) => values,
            Err(e) => {
                return Err(Error::Annotation {
                    path: path.to_path_buf(),
                    msg: format!("line {}: {}", line_no + 1, e),
                })
            }
        };
        if values.len() != 4 {
            return Err(Error::Annotation {
                path: path.to_path_buf(),
                msg: format!("line {}: expected 4 values, got {}", line_no + 1, values.len()),
            });
        }
        rois.push(Rect::new(values[0], values[1], values[2], values[3]));
    }
    Ok(rois)
}
