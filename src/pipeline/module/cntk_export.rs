use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::imdb::RoidbEntry;
use crate::error::{Error, Result};
use crate::pipeline::frcnn_pipeline::config::CntkExportConfig;
use crate::processing::bbox_regression::BboxTargetAssigner;
use crate::processing::letterbox::LetterboxTransform;
use crate::rcnn::bbox::Rect;

pub const ROIS_TAG: &str = "rois";
pub const LABELS_TAG: &str = "roiLabels";
pub const REGR_TARGET_TAG: &str = "regrTarget";

/// What to do with images that have more candidates than the fixed roi
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Keep the first rois in roidb order (ground truth, then proposals).
    #[default]
    KeepFirst,
    /// Abort with `Error::TooManyRois`.
    Fail,
}

/// One image in trainer format. Every vector holds exactly `nr_rois`
/// entries (4, `num_classes` and 4 values per roi respectively).
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub index: usize,
    pub image_path: PathBuf,
    pub rois: Vec<f32>,
    pub labels: Vec<f32>,
    pub regr_targets: Vec<f32>,
}

pub struct CntkExport {
    config: CntkExportConfig,
    assigner: BboxTargetAssigner,
}

impl CntkExport {
    pub fn new(config: &CntkExportConfig, num_classes: usize) -> Result<Self> {
        let assigner = BboxTargetAssigner::new(config.pos_overlap_thres, num_classes, config.regression)?;
        Ok(CntkExport {
            config: config.clone(),
            assigner,
        })
    }

    /// call converts one roidb entry. Candidate and ground-truth boxes go
    /// through the same letterbox and relative-coordinate conversion before
    /// the regression target is computed.
    pub fn call(&self, index: usize, entry: &RoidbEntry) -> Result<ExportRecord> {
        let transform = LetterboxTransform::new(
            entry.width,
            entry.height,
            self.config.pad_width,
            self.config.pad_height,
        )?;

        let mut num_rois = entry.num_boxes();
        if num_rois > self.config.nr_rois {
            match self.config.truncation {
                TruncationPolicy::Fail => {
                    return Err(Error::TooManyRois {
                        image: entry.image_path.clone(),
                        count: num_rois,
                        max: self.config.nr_rois,
                    })
                }
                TruncationPolicy::KeepFirst => {
                    warn!(
                        image = %entry.image_path.display(),
                        count = num_rois,
                        max = self.config.nr_rois,
                        "truncating rois"
                    );
                    num_rois = self.config.nr_rois;
                }
            }
        }

        let mut rel_coords: Vec<[f32; 4]> = Vec::with_capacity(entry.num_boxes());
        for row in entry.boxes.outer_iter() {
            let canvas_rect = transform.apply(&Rect::from_row(row));
            match transform.relative(&canvas_rect) {
                Ok(rel) => rel_coords.push(rel),
                Err(Error::RoiOutOfBounds { rect, width, height, .. }) => {
                    return Err(Error::RoiOutOfBounds {
                        image: entry.image_path.clone(),
                        rect,
                        width,
                        height,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        let num_classes = self.assigner.num_classes();
        let mut rois = Vec::with_capacity(4 * self.config.nr_rois);
        let mut labels = Vec::with_capacity(num_classes * self.config.nr_rois);
        let mut regr_targets = Vec::with_capacity(4 * self.config.nr_rois);

        for box_index in 0..num_rois {
            let roi_rel = &rel_coords[box_index];
            let gt_rel = if entry.num_gt() > 0 {
                Some(&rel_coords[entry.gt_argmaxes[box_index]])
            } else {
                None
            };
            let assignment = self.assigner.call(
                roi_rel,
                gt_rel,
                entry.gt_overlaps.row(box_index),
                entry.gt_argmaxes[box_index],
                &entry.gt_classes,
            )?;

            rois.extend_from_slice(roi_rel);
            labels.extend_from_slice(&assignment.label);
            regr_targets.extend_from_slice(&assignment.target);
        }

        pad_inputs(
            num_rois,
            self.config.nr_rois,
            num_classes,
            &mut rois,
            &mut labels,
            &mut regr_targets,
        );

        Ok(ExportRecord {
            index,
            image_path: entry.image_path.clone(),
            rois,
            labels,
            regr_targets,
        })
    }
}

/// pad_inputs appends inert rois (zero box, background label, zero target)
/// until `target_nr_rois` entries are present.
pub fn pad_inputs(
    current_nr_rois: usize,
    target_nr_rois: usize,
    num_classes: usize,
    rois: &mut Vec<f32>,
    labels: &mut Vec<f32>,
    regr_targets: &mut Vec<f32>,
) {
    for _ in current_nr_rois..target_nr_rois {
        rois.extend_from_slice(&[0.0; 4]);
        labels.push(1.0);
        labels.extend(std::iter::repeat(0.0).take(num_classes - 1));
        regr_targets.extend_from_slice(&[0.0; 4]);
    }
}

fn join_values(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 8);
    for v in values {
        out.push(' ');
        out.push_str(&v.to_string());
    }
    out
}

impl ExportRecord {
    pub fn image_line(&self) -> String {
        format!("{}\t{}\t0", self.index, self.image_path.display())
    }

    pub fn rois_line(&self) -> String {
        format!("{} |{}{}", self.index, ROIS_TAG, join_values(&self.rois))
    }

    pub fn labels_line(&self) -> String {
        format!("{} |{}{}", self.index, LABELS_TAG, join_values(&self.labels))
    }

    pub fn regr_targets_line(&self) -> String {
        format!("{} |{}{}", self.index, REGR_TARGET_TAG, join_values(&self.regr_targets))
    }
}

/// Paths of the four streams written for one image set.
#[derive(Debug, Clone, PartialEq)]
pub struct CntkInputPaths {
    pub images: PathBuf,
    pub rois: PathBuf,
    pub labels: PathBuf,
    pub regr_targets: PathBuf,
}

impl CntkInputPaths {
    pub fn new(cntk_files_dir: &Path, image_set: &str) -> Self {
        CntkInputPaths {
            images: cntk_files_dir.join(format!("{}.txt", image_set)),
            rois: cntk_files_dir.join(format!("{}.rois.txt", image_set)),
            labels: cntk_files_dir.join(format!("{}.roilabels.txt", image_set)),
            regr_targets: cntk_files_dir.join(format!("{}.regrtargets.txt", image_set)),
        }
    }

    /// missing lists the files the trainer reads that do not exist.
    pub fn missing(&self) -> Vec<PathBuf> {
        [&self.images, &self.rois, &self.labels]
            .into_iter()
            .filter(|p| !p.exists())
            .cloned()
            .collect()
    }
}

/// CntkWriter is the single writer of the four output streams.
pub struct CntkWriter {
    paths: CntkInputPaths,
    images: BufWriter<File>,
    rois: BufWriter<File>,
    labels: BufWriter<File>,
    regr_targets: BufWriter<File>,
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    match File::create(path) {
        Ok(file) => Ok(BufWriter::new(file)),
        Err(e) => Err(Error::io(path, e)),
    }
}

impl CntkWriter {
    pub fn create(paths: CntkInputPaths) -> Result<Self> {
        Ok(CntkWriter {
            images: create(&paths.images)?,
            rois: create(&paths.rois)?,
            labels: create(&paths.labels)?,
            regr_targets: create(&paths.regr_targets)?,
            paths,
        })
    }

    pub fn write(&mut self, record: &ExportRecord) -> Result<()> {
        writeln!(self.images, "{}", record.image_line()).map_err(|e| Error::io(&self.paths.images, e))?;
        writeln!(self.rois, "{}", record.rois_line()).map_err(|e| Error::io(&self.paths.rois, e))?;
        writeln!(self.labels, "{}", record.labels_line()).map_err(|e| Error::io(&self.paths.labels, e))?;
        writeln!(self.regr_targets, "{}", record.regr_targets_line())
            .map_err(|e| Error::io(&self.paths.regr_targets, e))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<CntkInputPaths> {
        self.images.flush().map_err(|e| Error::io(&self.paths.images, e))?;
        self.rois.flush().map_err(|e| Error::io(&self.paths.rois, e))?;
        self.labels.flush().map_err(|e| Error::io(&self.paths.labels, e))?;
        self.regr_targets
            .flush()
            .map_err(|e| Error::io(&self.paths.regr_targets, e))?;
        Ok(self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::imdb::GroundTruth;
    use crate::processing::bbox_regression::RegressionParameterization;

    fn export_config(nr_rois: usize) -> CntkExportConfig {
        let mut config = CntkExportConfig::new();
        config.pad_width = 100;
        config.pad_height = 100;
        config.nr_rois = nr_rois;
        config
    }

    fn sample_entry() -> RoidbEntry {
        let gt = vec![GroundTruth { rect: Rect::new(10.0, 10.0, 49.0, 49.0), class: 2 }];
        let proposals = vec![
            Rect::new(12.0, 10.0, 51.0, 49.0),
            Rect::new(150.0, 60.0, 190.0, 95.0),
        ];
        RoidbEntry::new(Path::new("imgs/a.jpg"), 200, 100, &gt, &proposals)
    }

    #[test]
    fn test_record_is_padded() {
        let export = CntkExport::new(&export_config(5), 3).unwrap();
        let record = export.call(7, &sample_entry()).unwrap();

        assert_eq!(record.rois.len(), 5 * 4);
        assert_eq!(record.labels.len(), 5 * 3);
        assert_eq!(record.regr_targets.len(), 5 * 4);

        // ground truth, overlapping proposal, background proposal
        assert_eq!(&record.labels[0..9], &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(&record.regr_targets[0..4], &[0.0; 4]);
        assert!(record.regr_targets[4..8].iter().any(|v| *v != 0.0));
        assert_eq!(&record.regr_targets[8..12], &[0.0; 4]);

        // inert tail
        assert!(record.rois[12..].iter().all(|v| *v == 0.0));
        assert_eq!(&record.labels[9..], &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(record.regr_targets[12..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_relative_coordinates() {
        let export = CntkExport::new(&export_config(3), 3).unwrap();
        let record = export.call(0, &sample_entry()).unwrap();
        // 200x100 image on a 100x100 canvas: scale 0.5, y offset 25
        assert_eq!(&record.rois[0..4], &[0.05, 0.3, 0.2, 0.2]);
    }

    #[test]
    fn test_truncation_policies() {
        let mut config = export_config(2);
        let export = CntkExport::new(&config, 3).unwrap();
        let record = export.call(0, &sample_entry()).unwrap();
        assert_eq!(record.rois.len(), 8);
        assert_eq!(&record.labels[0..3], &[0.0, 0.0, 1.0]);

        config.truncation = TruncationPolicy::Fail;
        let export = CntkExport::new(&config, 3).unwrap();
        assert!(matches!(export.call(0, &sample_entry()), Err(Error::TooManyRois { count: 3, max: 2, .. })));
    }

    #[test]
    fn test_negative_image_is_all_background() {
        let entry = RoidbEntry::new(Path::new("neg.jpg"), 100, 100, &[], &[Rect::new(5.0, 5.0, 50.0, 50.0)]);
        let mut config = export_config(2);
        config.regression = RegressionParameterization::Linear;
        let record = CntkExport::new(&config, 2).unwrap().call(1, &entry).unwrap();
        assert_eq!(record.labels, vec![1.0, 0.0, 1.0, 0.0]);
        assert!(record.regr_targets.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_line_format() {
        let record = ExportRecord {
            index: 3,
            image_path: PathBuf::from("data/x.jpg"),
            rois: vec![0.25, 0.5, 0.0, 1.0],
            labels: vec![1.0, 0.0],
            regr_targets: vec![0.0, -0.5, 0.125, 0.0],
        };
        assert_eq!(record.image_line(), "3\tdata/x.jpg\t0");
        assert_eq!(record.rois_line(), "3 |rois 0.25 0.5 0 1");
        assert_eq!(record.labels_line(), "3 |roiLabels 1 0");
        assert_eq!(record.regr_targets_line(), "3 |regrTarget 0 -0.5 0.125 0");
    }

    #[test]
    fn test_writer_and_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CntkInputPaths::new(dir.path(), "train");
        assert_eq!(paths.missing().len(), 3);

        let export = CntkExport::new(&export_config(3), 3).unwrap();
        let mut writer = CntkWriter::create(paths.clone()).unwrap();
        writer.write(&export.call(0, &sample_entry()).unwrap()).unwrap();
        writer.write(&export.call(1, &sample_entry()).unwrap()).unwrap();
        let written = writer.finish().unwrap();

        assert!(written.missing().is_empty());
        let rois = std::fs::read_to_string(&written.rois).unwrap();
        let lines: Vec<&str> = rois.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1 |rois "));
        assert_eq!(lines[0].split_whitespace().count(), 2 + 3 * 4);
    }
}
