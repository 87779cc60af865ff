use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView1, ArrayView2};
use tracing::{debug, info};

use crate::dataset::cache::RoidbCache;
use crate::error::{Error, Result};
use crate::pipeline::frcnn_pipeline::config::{ImageSetConfig, PipelineConfig};
use crate::pipeline::module::roi_generation::read_roi_file;
use crate::rcnn::bbox::{bbox_overlaps, rects_to_array, Rect};
use crate::utils::utils::{file_stem, files_with_extension, image_dimensions};

pub const BBOXES_SUFFIX: &str = ".bboxes.tsv";
pub const LABELS_SUFFIX: &str = ".bboxes.labels.tsv";
pub const ROI_SUFFIX: &str = ".roi.txt";

/// An annotated object: box in original image pixels plus class index.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub rect: Rect,
    pub class: usize,
}

/// Everything stage 2 needs to know about one image.
///
/// `boxes` lists the ground-truth boxes first, followed by the stage 1
/// proposals in file order. `gt_overlaps[i, j]` is the IoU of box `i` with
/// ground-truth box `j` and `gt_argmaxes[i]` the best `j`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoidbEntry {
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub boxes: Array2<f32>,
    pub gt_classes: Vec<usize>,
    pub gt_overlaps: Array2<f32>,
    pub gt_argmaxes: Vec<usize>,
}

impl RoidbEntry {
    pub fn new(
        image_path: &Path,
        width: u32,
        height: u32,
        ground_truth: &[GroundTruth],
        proposals: &[Rect],
    ) -> Self {
        let mut rects: Vec<Rect> = ground_truth.iter().map(|gt| gt.rect).collect();
        rects.extend_from_slice(proposals);
        let boxes = rects_to_array(&rects);
        let gt_classes = ground_truth.iter().map(|gt| gt.class).collect();
        Self::from_parts(image_path, width, height, boxes, gt_classes)
    }

    /// from_parts recomputes overlaps from the boxes; the first
    /// `gt_classes.len()` rows of `boxes` must be the ground truth.
    pub fn from_parts(
        image_path: &Path,
        width: u32,
        height: u32,
        boxes: Array2<f32>,
        gt_classes: Vec<usize>,
    ) -> Self {
        let num_gt = gt_classes.len();
        let gt_overlaps = bbox_overlaps(boxes.view(), boxes.slice(s![..num_gt, ..]));
        Self::with_overlaps(image_path, width, height, boxes, gt_classes, gt_overlaps)
    }

    /// with_overlaps takes precomputed overlaps and only derives the best
    /// ground-truth index of every box.
    pub fn with_overlaps(
        image_path: &Path,
        width: u32,
        height: u32,
        boxes: Array2<f32>,
        gt_classes: Vec<usize>,
        gt_overlaps: Array2<f32>,
    ) -> Self {
        let gt_argmaxes = gt_overlaps.outer_iter().map(|row| argmax(row)).collect();
        RoidbEntry {
            image_path: image_path.to_path_buf(),
            width,
            height,
            boxes,
            gt_classes,
            gt_overlaps,
            gt_argmaxes,
        }
    }

    pub fn num_boxes(&self) -> usize {
        self.boxes.nrows()
    }

    pub fn num_gt(&self) -> usize {
        self.gt_classes.len()
    }

    pub fn gt_boxes(&self) -> ArrayView2<f32> {
        self.boxes.slice(s![..self.num_gt(), ..])
    }
}

/// argmax returns the index of the first maximum, 0 for an empty row.
fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Ground truth and candidates of one image set.
#[derive(Debug, Clone)]
pub struct Imdb {
    pub name: String,
    pub roidb: Vec<RoidbEntry>,
}

impl Imdb {
    /// load reads every image of the set, its annotations and its stage 1
    /// roi file. Images are ordered by sub-directory, then file name. The
    /// first failing image aborts the load.
    pub fn load(config: &PipelineConfig, image_set: &ImageSetConfig) -> Result<Self> {
        Self::load_with(config, image_set, |_, e| Err(e))
    }

    /// load_with hands every per-image failure to `on_failure`. Returning
    /// `Ok` leaves the image out of the roidb, returning `Err` aborts.
    pub fn load_with<F>(config: &PipelineConfig, image_set: &ImageSetConfig, mut on_failure: F) -> Result<Self>
    where
        F: FnMut(&Path, Error) -> Result<()>,
    {
        let cache = config
            .cache_dir
            .as_ref()
            .map(|dir| RoidbCache::new(dir.join(&image_set.name)));
        let mut roidb = Vec::new();

        for sub_dir in &image_set.sub_dirs {
            let img_dir = config.img_dir.join(sub_dir);
            let images = files_with_extension(&img_dir, &config.image_extension)?;
            debug!(dir = %img_dir.display(), count = images.len(), "listing images");

            for image_path in images {
                match load_entry(config, cache.as_ref(), sub_dir, &image_path) {
                    Ok(entry) => roidb.push(entry),
                    Err(e) => on_failure(image_path.as_path(), e)?,
                }
            }
        }

        info!(set = %image_set.name, images = roidb.len(), "loaded image set");
        Ok(Imdb {
            name: image_set.name.clone(),
            roidb,
        })
    }

    pub fn num_images(&self) -> usize {
        self.roidb.len()
    }

    pub fn image_path_at(&self, index: usize) -> &Path {
        &self.roidb[index].image_path
    }
}

fn load_entry(
    config: &PipelineConfig,
    cache: Option<&RoidbCache>,
    sub_dir: &str,
    image_path: &Path,
) -> Result<RoidbEntry> {
    let stem = file_stem(image_path);
    let cache_key = format!("{}/{}", sub_dir, stem);

    if let Some(cache) = cache {
        if let Some(entry) = cache.load(&cache_key, image_path)? {
            return Ok(entry);
        }
    }

    let (width, height) = image_dimensions(image_path)?;
    let ground_truth = read_ground_truth(image_path, config)?;
    let roi_path = config
        .roi_dir
        .join(sub_dir)
        .join(format!("{}{}", stem, ROI_SUFFIX));
    if !roi_path.exists() {
        return Err(Error::MissingInputs {
            paths: vec![roi_path],
            hint: "Run the `generate-rois` stage first".to_string(),
        });
    }
    let proposals = read_roi_file(&roi_path)?;
    let entry = RoidbEntry::new(image_path, width, height, &ground_truth, &proposals);

    if let Some(cache) = cache {
        cache.save(&cache_key, &entry)?;
    }
    Ok(entry)
}

fn sibling_with_suffix(image_path: &Path, suffix: &str) -> PathBuf {
    let stem = file_stem(image_path);
    image_path.with_file_name(format!("{}{}", stem, suffix))
}

/// read_ground_truth loads `<stem>.bboxes.tsv` and
/// `<stem>.bboxes.labels.tsv` next to the image. Images without either file
/// (negatives) have no ground truth.
pub fn read_ground_truth(image_path: &Path, config: &PipelineConfig) -> Result<Vec<GroundTruth>> {
    let boxes_path = sibling_with_suffix(image_path, BBOXES_SUFFIX);
    let labels_path = sibling_with_suffix(image_path, LABELS_SUFFIX);

    match (boxes_path.exists(), labels_path.exists()) {
        (false, false) => return Ok(vec![]),
        (true, true) => {}
        (true, false) => {
            return Err(Error::MissingInputs {
                paths: vec![labels_path],
                hint: "Every box annotation file needs a matching labels file".to_string(),
            })
        }
        (false, true) => {
            return Err(Error::MissingInputs {
                paths: vec![boxes_path],
                hint: "Every labels file needs a matching box annotation file".to_string(),
            })
        }
    }

    let boxes_raw = fs::read_to_string(&boxes_path).map_err(|e| Error::io(&boxes_path, e))?;
    let labels_raw = fs::read_to_string(&labels_path).map_err(|e| Error::io(&labels_path, e))?;

    let boxes: Vec<&str> = boxes_raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let labels: Vec<&str> = labels_raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if boxes.len() != labels.len() {
        return Err(Error::Annotation {
            path: boxes_path,
            msg: format!("{} boxes but {} labels", boxes.len(), labels.len()),
        });
    }

    let mut ground_truth = Vec::with_capacity(boxes.len());
    for (line_no, (line, label)) in boxes.iter().zip(labels.iter()).enumerate() {
        let values: Vec<f32> = match line
            .split_whitespace()
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(values) => values,
            Err(e) => {
                return Err(Error::Annotation {
                    path: boxes_path,
                    msg: format!("line {}: {} in {:?}", line_no + 1, e, line),
                })
            }
        };
        if values.len() != 4 {
            return Err(Error::Annotation {
                path: boxes_path,
                msg: format!("line {}: expected 4 numbers in {:?}", line_no + 1, line),
            });
        }
        let class = match config.class_index(label) {
            Some(0) | None => {
                return Err(Error::Annotation {
                    path: labels_path,
                    msg: format!("line {}: unknown class {:?}", line_no + 1, label),
                })
            }
            Some(class) => class,
        };
        ground_truth.push(GroundTruth {
            rect: Rect::new(values[0], values[1], values[2], values[3]),
            class,
        });
    }
    Ok(ground_truth)
}
