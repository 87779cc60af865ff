use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy};
use tracing::debug;

use crate::dataset::imdb::RoidbEntry;
use crate::error::{Error, Result};
use crate::utils::utils::{image_dimensions, make_directory};

/// RoidbCache keeps the boxes and overlaps of every image as `.npy` files so
/// later export runs skip annotation parsing and overlap computation. Stage 1
/// invalidates it whenever roi files are rewritten.
#[derive(Debug, Clone)]
pub struct RoidbCache {
    dir: PathBuf,
}

impl RoidbCache {
    pub fn new(dir: PathBuf) -> Self {
        RoidbCache { dir }
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.dir.join(format!("{}.boxes.npy", key)),
            self.dir.join(format!("{}.gt_overlaps.npy", key)),
            self.dir.join(format!("{}.gt_classes.npy", key)),
        )
    }

    pub fn save(&self, key: &str, entry: &RoidbEntry) -> Result<()> {
        let (boxes_path, overlaps_path, classes_path) = self.paths(key);
        if let Some(parent) = boxes_path.parent() {
            make_directory(parent)?;
        }
        let classes: Array1<i64> = entry.gt_classes.iter().map(|&c| c as i64).collect();

        write(&boxes_path, &entry.boxes)?;
        write(&overlaps_path, &entry.gt_overlaps)?;
        if let Err(e) = write_npy(&classes_path, &classes) {
            return Err(Error::Npy {
                path: classes_path,
                msg: e.to_string(),
            });
        }
        debug!(key, "cached roidb entry");
        Ok(())
    }

    /// load returns `None` when the entry was never cached.
    pub fn load(&self, key: &str, image_path: &Path) -> Result<Option<RoidbEntry>> {
        let (boxes_path, overlaps_path, classes_path) = self.paths(key);
        if !(boxes_path.exists() && overlaps_path.exists() && classes_path.exists()) {
            return Ok(None);
        }

        let boxes: Array2<f32> = read(&boxes_path)?;
        let gt_overlaps: Array2<f32> = read(&overlaps_path)?;
        let classes: Array1<i64> = match read_npy(&classes_path) {
            Ok(classes) => classes,
            Err(e) => {
                return Err(Error::Npy {
                    path: classes_path,
                    msg: e.to_string(),
                })
            }
        };
        if boxes.ncols() != 4 || gt_overlaps.nrows() != boxes.nrows() || gt_overlaps.ncols() != classes.len() {
            return Err(Error::Npy {
                path: boxes_path,
                msg: "cached arrays have inconsistent shapes".to_string(),
            });
        }

        let (width, height) = image_dimensions(image_path)?;
        let gt_classes = classes.iter().map(|&c| c as usize).collect();
        let entry = RoidbEntry::with_overlaps(image_path, width, height, boxes, gt_classes, gt_overlaps);
        debug!(key, "roidb cache hit");
        Ok(Some(entry))
    }

    /// clear removes the whole cache directory.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        }
        Ok(())
    }
}

fn write(path: &Path, array: &Array2<f32>) -> Result<()> {
    match write_npy(path, array) {
        Ok(()) => Ok(()),
        Err(e) => Err(Error::Npy {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }),
    }
}

fn read(path: &Path) -> Result<Array2<f32>> {
    match read_npy(path) {
        Ok(array) => Ok(array),
        Err(e) => Err(Error::Npy {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }),
    }
}
