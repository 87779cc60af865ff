use std::collections::HashSet;

use crate::rcnn::bbox::Rect;

/// Margin in pixels of the rect used when nothing survives filtering.
pub const FALLBACK_MARGIN: f32 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RoiFilter {
    min_nr_pixels: f32,
    max_nr_pixels: f32,
    min_dim: f32,
    max_dim: f32,
    max_aspect_ratio: f32,
}

impl RoiFilter {
    pub fn new(
        min_nr_pixels: f32,
        max_nr_pixels: f32,
        min_dim: f32,
        max_dim: f32,
        max_aspect_ratio: f32,
    ) -> Self {
        RoiFilter {
            min_nr_pixels,
            max_nr_pixels,
            min_dim,
            max_dim,
            max_aspect_ratio,
        }
    }

    /// from_relative builds the bounds from values given relative to the
    /// maximum image dimension `max_img_dim` (pixel counts relative to its
    /// square).
    pub fn from_relative(
        max_img_dim: f32,
        min_nr_pixels_rel: f32,
        max_nr_pixels_rel: f32,
        min_dim_rel: f32,
        max_dim_rel: f32,
        max_aspect_ratio: f32,
    ) -> Self {
        let area = max_img_dim * max_img_dim;
        RoiFilter::new(
            min_nr_pixels_rel * area,
            max_nr_pixels_rel * area,
            min_dim_rel * max_img_dim,
            max_dim_rel * max_img_dim,
            max_aspect_ratio,
        )
    }

    pub fn accepts(&self, rect: &Rect, max_width: f32, max_height: f32) -> bool {
        let w = rect.width();
        let h = rect.height();
        if w <= 0.0 || h <= 0.0 {
            return false;
        }
        if rect.x1 < 0.0 || rect.y1 < 0.0 || rect.x2 > max_width || rect.y2 > max_height {
            return false;
        }
        if w < self.min_dim || h < self.min_dim || w > self.max_dim || h > self.max_dim {
            return false;
        }
        let area = w * h;
        if area < self.min_nr_pixels || area > self.max_nr_pixels {
            return false;
        }
        w / h <= self.max_aspect_ratio && h / w <= self.max_aspect_ratio
    }

    /// call keeps the rects that pass every bound, in input order, dropping
    /// exact duplicates. The result may be empty; see `filter_or_fallback`.
    pub fn call(&self, rects: &[Rect], max_width: f32, max_height: f32) -> Vec<Rect> {
        let mut seen: HashSet<[u32; 4]> = HashSet::new();
        let mut filtered = Vec::new();

        for rect in rects {
            let key = rect.to_array().map(f32::to_bits);
            if seen.contains(&key) {
                continue;
            }
            if !self.accepts(rect, max_width, max_height) {
                continue;
            }
            seen.insert(key);
            filtered.push(*rect);
        }
        filtered
    }

    /// filter_or_fallback never returns an empty set: when no rect passes,
    /// the image inset by `FALLBACK_MARGIN` is used instead.
    pub fn filter_or_fallback(&self, rects: &[Rect], max_width: f32, max_height: f32) -> Vec<Rect> {
        let filtered = self.call(rects, max_width, max_height);
        if filtered.is_empty() {
            return vec![fallback_rect(max_width, max_height)];
        }
        filtered
    }
}

pub fn fallback_rect(width: f32, height: f32) -> Rect {
    Rect::new(
        FALLBACK_MARGIN,
        FALLBACK_MARGIN,
        width - FALLBACK_MARGIN,
        height - FALLBACK_MARGIN,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use ndarray::Array2;

    fn grocery_filter() -> RoiFilter {
        RoiFilter::from_relative(200.0, 0.0, 1.0, 0.01, 1.0, 4.0)
    }

    #[test]
    fn test_from_relative_bounds() {
        let filter = RoiFilter::from_relative(200.0, 0.1, 0.5, 0.05, 0.9, 3.0);
        assert_eq!(filter, RoiFilter::new(4000.0, 20000.0, 10.0, 180.0, 3.0));
    }

    #[test]
    fn test_rejects_each_bound() {
        let filter = RoiFilter::new(100.0, 10000.0, 5.0, 150.0, 2.0);
        // ok
        assert!(filter.accepts(&Rect::new(0.0, 0.0, 20.0, 20.0), 200.0, 200.0));
        // degenerate
        assert!(!filter.accepts(&Rect::new(10.0, 10.0, 10.0, 40.0), 200.0, 200.0));
        // outside
        assert!(!filter.accepts(&Rect::new(190.0, 0.0, 210.0, 20.0), 200.0, 200.0));
        // side too short / too long
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 4.0, 60.0), 200.0, 200.0));
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 160.0, 100.0), 200.0, 200.0));
        // too few / too many pixels
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 9.0, 9.0), 200.0, 200.0));
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 120.0, 120.0), 200.0, 200.0));
        // aspect ratio in both orientations
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 90.0, 30.0), 200.0, 200.0));
        assert!(!filter.accepts(&Rect::new(0.0, 0.0, 30.0, 90.0), 200.0, 200.0));
    }

    #[test]
    fn test_drops_duplicates_keeps_order() {
        let filter = grocery_filter();
        let a = Rect::new(10.0, 10.0, 50.0, 50.0);
        let b = Rect::new(20.0, 20.0, 60.0, 70.0);
        let out = filter.call(&[b, a, b, a], 200.0, 200.0);
        assert_eq!(out, vec![b, a]);
    }

    #[test]
    fn test_fallback_when_empty() {
        let filter = grocery_filter();
        let out = filter.filter_or_fallback(&[Rect::new(0.0, 0.0, 1.0, 100.0)], 200.0, 150.0);
        assert_eq!(out, vec![Rect::new(5.0, 5.0, 195.0, 145.0)]);
    }

    #[test]
    fn test_filter_idempotent() {
        let filter = grocery_filter();
        let corners = Array2::random((200, 4), Uniform::new(0.0f32, 220.0));
        let rects: Vec<Rect> = corners
            .outer_iter()
            .map(|c| Rect::new(c[0].min(c[2]), c[1].min(c[3]), c[0].max(c[2]), c[1].max(c[3])).trunc())
            .collect();
        let once = filter.filter_or_fallback(&rects, 200.0, 200.0);
        let twice = filter.filter_or_fallback(&once, 200.0, 200.0);
        assert!(!once.is_empty());
        assert_eq!(once, twice);
    }
}
