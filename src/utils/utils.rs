use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};

/// byte_data_to_image decodes an encoded image and converts it to RGB.
pub fn byte_data_to_image(im_bytes: &[u8]) -> std::result::Result<RgbImage, image::ImageError> {
    let img = image::load_from_memory(im_bytes)?;
    Ok(match img {
        DynamicImage::ImageRgb8(img) => img,
        other => other.into_rgb8(),
    })
}

pub fn load_image(path: &Path) -> Result<RgbImage> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    match byte_data_to_image(&bytes) {
        Ok(img) => Ok(img),
        Err(e) => Err(Error::Image {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// image_dimensions reads only the header of an image file.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(dims) => Ok(dims),
        Err(e) => Err(Error::Image {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// resize_max_dim scales the image so that its larger side equals
/// `max_dim`. Smaller images are only enlarged when `upscale` is set,
/// otherwise they are returned as is with scale 1.
pub fn resize_max_dim(img: &RgbImage, max_dim: u32, upscale: bool) -> (RgbImage, f32) {
    let (w, h) = img.dimensions();
    let scale = max_dim as f32 / w.max(h) as f32;
    if scale >= 1.0 && !upscale {
        return (img.clone(), 1.0);
    }
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    (imageops::resize(img, new_w, new_h, FilterType::Triangle), scale)
}

/// files_with_extension lists the files of `dir` ending in `.ext`, sorted by
/// file name so image indices are stable across runs.
pub fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(ext));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn make_directory(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}

/// file_stem returns the file name without its extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_resize_max_dim_downscale() {
        let img = RgbImage::new(800, 600);
        let (resized, scale) = resize_max_dim(&img, 400, false);
        assert_eq!(scale, 0.5);
        assert_eq!(resized.dimensions(), (400, 300));
    }

    #[test]
    fn test_resize_max_dim_upscale_flag() {
        let img = RgbImage::new(100, 50);
        let (same, scale) = resize_max_dim(&img, 200, false);
        assert_eq!((same.dimensions(), scale), ((100, 50), 1.0));

        let (bigger, scale) = resize_max_dim(&img, 200, true);
        assert_eq!((bigger.dimensions(), scale), ((200, 100), 2.0));
    }

    #[test]
    fn test_load_image_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_pixel(12, 8, Rgb([10, 20, 30]));
        img.save(dir.path().join("b.png")).unwrap();
        img.save(dir.path().join("a.png")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = files_with_extension(dir.path(), "png").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(file_stem(&files[0]), "a");

        let loaded = load_image(&files[0]).unwrap();
        assert_eq!(loaded.dimensions(), (12, 8));
        assert_eq!(image_dimensions(&files[1]).unwrap(), (12, 8));
    }

    #[test]
    fn test_load_image_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"not an image").unwrap();
        match load_image(&path) {
            Err(Error::Image { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other.map(|i| i.dimensions())),
        }
    }
}
