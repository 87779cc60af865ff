use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::rcnn::bbox::Rect;

/// Fill value of the padded border, on every channel.
pub const PAD_VALUE: u8 = 114;

/// LetterboxTransform maps original image pixels into a fixed padded canvas:
/// the image is scaled uniformly so its larger side fills the canvas and
/// centered along the other axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub x_offset: f32,
    pub y_offset: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

impl LetterboxTransform {
    /// new computes the scale and offsets for a `img_width x img_height`
    /// image. Only square canvases are supported.
    pub fn new(img_width: u32, img_height: u32, canvas_width: u32, canvas_height: u32) -> Result<Self> {
        if canvas_width != canvas_height {
            return Err(Error::Config(format!(
                "padded canvas must be square, got {}x{}",
                canvas_width, canvas_height
            )));
        }
        if img_width == 0 || img_height == 0 {
            return Err(Error::Config(format!(
                "cannot letterbox an empty {}x{} image",
                img_width, img_height
            )));
        }

        let scale = canvas_width as f32 / img_width.max(img_height) as f32;
        let scaled_width = (img_width as f32 * scale).round() as u32;
        let scaled_height = (img_height as f32 * scale).round() as u32;

        Ok(LetterboxTransform {
            scale,
            x_offset: (canvas_width as f32 - scaled_width as f32) / 2.0,
            y_offset: (canvas_height as f32 - scaled_height as f32) / 2.0,
            canvas_width,
            canvas_height,
            scaled_width,
            scaled_height,
        })
    }

    /// apply scales a rect (rounding to whole pixels) and shifts it by the
    /// padding offsets.
    pub fn apply(&self, rect: &Rect) -> Rect {
        Rect::new(
            (rect.x1 * self.scale).round() + self.x_offset,
            (rect.y1 * self.scale).round() + self.y_offset,
            (rect.x2 * self.scale).round() + self.x_offset,
            (rect.y2 * self.scale).round() + self.y_offset,
        )
    }

    pub fn invert(&self, rect: &Rect) -> Rect {
        rect.translate(-self.x_offset, -self.y_offset)
            .scale(1.0 / self.scale)
    }

    /// relative expresses a canvas rect as `(x, y, w, h)` fractions of the
    /// canvas size.
    pub fn relative(&self, rect: &Rect) -> Result<[f32; 4]> {
        relative_coords(rect, self.canvas_width as f32, self.canvas_height as f32)
    }
}

pub fn relative_coords(rect: &Rect, canvas_width: f32, canvas_height: f32) -> Result<[f32; 4]> {
    let rel = [
        rect.x1 / canvas_width,
        rect.y1 / canvas_height,
        rect.width() / canvas_width,
        rect.height() / canvas_height,
    ];
    if rel.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(Error::RoiOutOfBounds {
            image: Default::default(),
            rect: rect.to_array(),
            width: canvas_width,
            height: canvas_height,
        });
    }
    Ok(rel)
}

/// letterbox_image renders the image the way the trainer sees it: resized
/// by the transform's scale and centered on a canvas filled with
/// `PAD_VALUE`.
pub fn letterbox_image(img: &RgbImage, transform: &LetterboxTransform) -> RgbImage {
    let resized = imageops::resize(
        img,
        transform.scaled_width.max(1),
        transform.scaled_height.max(1),
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(
        transform.canvas_width,
        transform.canvas_height,
        Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]),
    );
    imageops::replace(
        &mut canvas,
        &resized,
        transform.x_offset.floor() as i64,
        transform.y_offset.floor() as i64,
    );
    canvas
}
