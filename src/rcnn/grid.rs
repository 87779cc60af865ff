// Grid rois complement the selective search proposals with a fixed set of
// windows. Scales go from the largest cell (the shorter image side) down,
// halving each time; windows slide with a stride of half a cell.

use crate::rcnn::bbox::Rect;

/// grid_rois lays windows of every scale and aspect ratio over a
/// `width x height` image. A window is kept only when it ends strictly
/// inside the image, one pixel away from the border.
pub fn grid_rois(width: u32, height: u32, nr_scales: u32, aspect_ratios: &[f32]) -> Vec<Rect> {
    let img_w = width as f32;
    let img_h = height as f32;
    let mut rects = Vec::new();

    for iter in 0..nr_scales {
        let cell = img_w.min(img_h) / 2f32.powi(iter as i32);
        let step = cell / 2.0;
        if step <= 0.0 {
            continue;
        }

        for &ratio in aspect_ratios {
            let mut w_start = 0.0;
            while w_start < img_w {
                let mut h_start = 0.0;
                while h_start < img_h {
                    let (w_end, h_end) = if ratio < 1.0 {
                        (w_start + cell, h_start + cell / ratio)
                    } else {
                        (w_start + cell * ratio, h_start + cell)
                    };
                    if w_end < img_w - 1.0 && h_end < img_h - 1.0 {
                        rects.push(Rect::new(w_start, h_start, w_end, h_end));
                    }
                    h_start += step;
                }
                w_start += step;
            }
        }
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rois_deterministic() {
        let a = grid_rois(200, 150, 4, &[1.0, 2.0, 0.5]);
        let b = grid_rois(200, 150, 4, &[1.0, 2.0, 0.5]);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_grid_rois_inside_image() {
        for rect in grid_rois(200, 150, 5, &[1.0, 2.0, 0.5]) {
            assert!(rect.x1 >= 0.0 && rect.y1 >= 0.0);
            assert!(rect.x2 < 199.0);
            assert!(rect.y2 < 149.0);
        }
    }

    #[test]
    fn test_grid_rois_first_scale() {
        // cell 100, step 50 on a 200x100 image: no full-height window fits,
        // so only the next scale (cell 50, step 25) produces rects.
        let rects = grid_rois(200, 100, 2, &[1.0]);
        assert!(rects.iter().all(|r| (r.width() - 50.0).abs() < 1e-6));
        // x starts 0..=125 step 25 (w_end < 199), y starts 0, 25 (h_end < 99)
        assert_eq!(rects.len(), 6 * 2);
        assert_eq!(rects[0], Rect::new(0.0, 0.0, 50.0, 50.0));
    }

    #[test]
    fn test_grid_rois_aspect_ratio_shapes() {
        let wide = grid_rois(400, 400, 3, &[2.0]);
        assert!(wide.iter().all(|r| (r.width() - 2.0 * r.height()).abs() < 1e-4));
        let tall = grid_rois(400, 400, 3, &[0.5]);
        assert!(tall.iter().all(|r| (r.height() - 2.0 * r.width()).abs() < 1e-4));
    }
}
