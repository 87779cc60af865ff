use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest relative width/height used inside the log-space transform.
const MIN_REL_SIZE: f32 = 1.0e-6;

/// How the offset from a candidate to its ground-truth box is encoded.
/// Both variants take relative `(x, y, w, h)` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegressionParameterization {
    /// Center offsets normalized by the candidate size, log size ratios.
    #[default]
    Nonlinear,
    /// Raw difference `gt - roi` of the four relative values.
    Linear,
}

/// nonlinear_transform returns `(dx, dy, dw, dh)` moving `roi` onto `gt`.
pub fn nonlinear_transform(roi: &[f32; 4], gt: &[f32; 4]) -> [f32; 4] {
    let roi_w = roi[2].max(MIN_REL_SIZE);
    let roi_h = roi[3].max(MIN_REL_SIZE);
    let gt_w = gt[2].max(MIN_REL_SIZE);
    let gt_h = gt[3].max(MIN_REL_SIZE);

    let roi_cx = roi[0] + 0.5 * roi[2];
    let roi_cy = roi[1] + 0.5 * roi[3];
    let gt_cx = gt[0] + 0.5 * gt[2];
    let gt_cy = gt[1] + 0.5 * gt[3];

    [
        (gt_cx - roi_cx) / roi_w,
        (gt_cy - roi_cy) / roi_h,
        (gt_w / roi_w).ln(),
        (gt_h / roi_h).ln(),
    ]
}

pub fn linear_transform(roi: &[f32; 4], gt: &[f32; 4]) -> [f32; 4] {
    [gt[0] - roi[0], gt[1] - roi[1], gt[2] - roi[2], gt[3] - roi[3]]
}

/// Label and regression target of a single candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiAssignment {
    pub label: Vec<f32>,
    pub target: [f32; 4],
}

impl RoiAssignment {
    pub fn is_background(&self) -> bool {
        self.label.first().copied() == Some(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct BboxTargetAssigner {
    pos_overlap_thres: f32,
    num_classes: usize,
    parameterization: RegressionParameterization,
}

impl BboxTargetAssigner {
    pub fn new(
        pos_overlap_thres: f32,
        num_classes: usize,
        parameterization: RegressionParameterization,
    ) -> Result<Self> {
        if num_classes < 2 {
            return Err(Error::Config(format!(
                "need background plus at least one class, got {} classes",
                num_classes
            )));
        }
        Ok(BboxTargetAssigner {
            pos_overlap_thres,
            num_classes,
            parameterization,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// roi_label builds the one-hot label of a candidate. `overlaps` holds
    /// its IoU with every ground-truth box, `best_gt` the index of the
    /// best-overlapping box and `gt_classes` the class of every box.
    pub fn roi_label(
        &self,
        overlaps: ArrayView1<f32>,
        best_gt: usize,
        gt_classes: &[usize],
    ) -> Result<Vec<f32>> {
        let mut label = vec![0.0; self.num_classes];
        let max_overlap = overlaps.iter().copied().fold(0.0f32, f32::max);

        if overlaps.is_empty() || max_overlap < self.pos_overlap_thres {
            label[0] = 1.0;
            return Ok(label);
        }

        let class = match gt_classes.get(best_gt) {
            Some(&class) => class,
            None => {
                return Err(Error::Config(format!(
                    "best ground-truth index {} out of range ({} boxes)",
                    best_gt,
                    gt_classes.len()
                )))
            }
        };
        if class == 0 || class >= self.num_classes {
            return Err(Error::Config(format!(
                "ground-truth class {} outside 1..{}",
                class, self.num_classes
            )));
        }
        label[class] = 1.0;
        Ok(label)
    }

    pub fn regression_target(&self, roi: &[f32; 4], gt: &[f32; 4]) -> [f32; 4] {
        match self.parameterization {
            RegressionParameterization::Nonlinear => nonlinear_transform(roi, gt),
            RegressionParameterization::Linear => linear_transform(roi, gt),
        }
    }

    /// call assigns label and target. The target always points at the best
    /// ground-truth box, except for background candidates where it is zero.
    pub fn call(
        &self,
        roi_rel: &[f32; 4],
        gt_rel: Option<&[f32; 4]>,
        overlaps: ArrayView1<f32>,
        best_gt: usize,
        gt_classes: &[usize],
    ) -> Result<RoiAssignment> {
        let label = self.roi_label(overlaps, best_gt, gt_classes)?;
        let target = match gt_rel {
            Some(gt) if label[0] != 1.0 => self.regression_target(roi_rel, gt),
            _ => [0.0; 4],
        };
        Ok(RoiAssignment { label, target })
    }
}
