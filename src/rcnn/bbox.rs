use ndarray::{Array2, ArrayView1, ArrayView2};

/// Axis aligned box `(x1, y1, x2, y2)`.
///
/// The coordinate frame (resized image, original image or padded canvas) is
/// not stored; it is implied by whoever produced the rect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Rect { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// scale multiplies every coordinate by `factor`.
    pub fn scale(&self, factor: f32) -> Rect {
        Rect::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// trunc drops the fractional part of each coordinate.
    pub fn trunc(&self) -> Rect {
        Rect::new(
            self.x1.trunc(),
            self.y1.trunc(),
            self.x2.trunc(),
            self.y2.trunc(),
        )
    }

    /// iou computes intersection over union using inclusive pixel
    /// coordinates, the same convention as `bbox_overlaps`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let iw = self.x2.min(other.x2) - self.x1.max(other.x1) + 1.0;
        if iw <= 0.0 {
            return 0.0;
        }
        let ih = self.y2.min(other.y2) - self.y1.max(other.y1) + 1.0;
        if ih <= 0.0 {
            return 0.0;
        }
        let inter = iw * ih;
        let union = ((self.width() + 1.0) * (self.height() + 1.0)
            + (other.width() + 1.0) * (other.height() + 1.0)
            - inter)
            .max(1.0e-10);
        inter / union
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn from_row(row: ArrayView1<f32>) -> Self {
        Rect::new(row[0], row[1], row[2], row[3])
    }
}

impl From<[f32; 4]> for Rect {
    fn from(v: [f32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

/// rects_to_array stacks rects into an `n x 4` matrix.
pub fn rects_to_array(rects: &[Rect]) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((rects.len(), 4));
    for (i, rect) in rects.iter().enumerate() {
        out[[i, 0]] = rect.x1;
        out[[i, 1]] = rect.y1;
        out[[i, 2]] = rect.x2;
        out[[i, 3]] = rect.y2;
    }
    out
}

pub fn array_to_rects(boxes: ArrayView2<f32>) -> Vec<Rect> {
    boxes.outer_iter().map(Rect::from_row).collect()
}

/// bbox_overlaps computes the `n x k` IoU matrix between `boxes` and
/// `query_boxes`, both given as `[x1, y1, x2, y2]` rows.
pub fn bbox_overlaps(boxes: ArrayView2<f32>, query_boxes: ArrayView2<f32>) -> Array2<f32> {
    let n = boxes.shape()[0];
    let k = query_boxes.shape()[0];
    let mut overlaps = Array2::<f32>::zeros((n, k));

    for k_idx in 0..k {
        let query = Rect::from_row(query_boxes.row(k_idx));
        for n_idx in 0..n {
            overlaps[(n_idx, k_idx)] = Rect::from_row(boxes.row(n_idx)).iou(&query);
        }
    }
    overlaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Rect::new(10.0, 10.0, 20.0, 20.0);
        let b = Rect::new(30.0, 30.0, 40.0, 40.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        // 11x11 boxes sharing a 6x11 strip
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 15.0, 10.0);
        let expected = 66.0 / (121.0 + 121.0 - 66.0);
        assert!((a.iou(&b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_overlaps() {
        let boxes = array![[0.0, 0.0, 10.0, 10.0], [100.0, 100.0, 110.0, 110.0]];
        let gt = array![[0.0, 0.0, 10.0, 10.0]];
        let overlaps = bbox_overlaps(boxes.view(), gt.view());
        assert_eq!(overlaps.shape(), &[2, 1]);
        assert!((overlaps[(0, 0)] - 1.0).abs() < 1e-6);
        assert_eq!(overlaps[(1, 0)], 0.0);
    }

    #[test]
    fn test_bbox_overlaps_symmetric_and_bounded() {
        let corners = Array2::random((20, 4), Uniform::new(0.0f32, 100.0));
        let mut boxes = Array2::<f32>::zeros((20, 4));
        for (i, row) in corners.outer_iter().enumerate() {
            boxes[[i, 0]] = row[0].min(row[2]);
            boxes[[i, 1]] = row[1].min(row[3]);
            boxes[[i, 2]] = row[0].max(row[2]);
            boxes[[i, 3]] = row[1].max(row[3]);
        }
        let overlaps = bbox_overlaps(boxes.view(), boxes.view());
        for i in 0..20 {
            for j in 0..20 {
                let v = overlaps[(i, j)];
                assert!((0.0..=1.0 + 1e-6).contains(&v));
                assert!((v - overlaps[(j, i)]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_rects_array_round_trip() {
        let rects = vec![Rect::new(1.0, 2.0, 3.0, 4.0), Rect::new(5.0, 6.0, 7.0, 8.0)];
        let arr = rects_to_array(&rects);
        assert_eq!(array_to_rects(arr.view()), rects);
    }
}
