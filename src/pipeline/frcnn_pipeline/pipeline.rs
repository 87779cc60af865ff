use std::path::Path;

use tracing::{info, warn};

use crate::dataset::cache::RoidbCache;
use crate::dataset::imdb::{Imdb, ROI_SUFFIX};
use crate::error::{Error, Result};
use crate::pipeline::frcnn_pipeline::config::PipelineConfig;
use crate::pipeline::module::cntk_export::{CntkExport, CntkInputPaths, CntkWriter};
use crate::pipeline::module::roi_generation::{write_roi_file, RoiGeneration};
use crate::utils::utils::{file_stem, files_with_extension, make_directory};

const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// FrcnnPipeline runs both preparation stages over a dataset.
pub struct FrcnnPipeline {
    config: PipelineConfig,
}

impl FrcnnPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(FrcnnPipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// handle_failure decides whether a per-image error ends the run.
    fn handle_failure(&self, image: &Path, err: Error, summary: &mut StageSummary) -> Result<()> {
        if !self.config.skip_failed_images {
            return Err(err);
        }
        warn!(image = %image.display(), error = %err, "skipping image");
        summary.skipped += 1;
        Ok(())
    }

    /// generate_rois writes `<roi_dir>/<sub_dir>/<stem>.roi.txt` for every
    /// image of every configured sub-directory, then drops the roidb cache.
    pub fn generate_rois(&self) -> Result<StageSummary> {
        let generator = RoiGeneration::new(&self.config.roi_generation);
        let mut summary = StageSummary::default();

        for sub_dir in self.config.sub_dirs() {
            let out_dir = self.config.roi_dir.join(&sub_dir);
            make_directory(&out_dir)?;
            let images = files_with_extension(&self.config.img_dir.join(&sub_dir), &self.config.image_extension)?;

            for (img_index, image_path) in images.iter().enumerate() {
                info!(
                    sub_dir = %sub_dir,
                    image = img_index,
                    total = images.len(),
                    file = %image_path.display(),
                    "generating rois"
                );
                let image_rois = match generator.call(image_path) {
                    Ok(image_rois) => image_rois,
                    Err(e) => {
                        self.handle_failure(image_path, e, &mut summary)?;
                        continue;
                    }
                };
                let roi_path = out_dir.join(format!("{}{}", file_stem(image_path), ROI_SUFFIX));
                write_roi_file(&roi_path, &image_rois.rois)?;
                info!(count = image_rois.rois.len(), "rois written");
                summary.processed += 1;
            }
        }

        // cached roidb entries were built from the previous roi files
        self.clear_cache()?;
        Ok(summary)
    }

    /// clear_cache drops the cached roidb so the next export re-reads all
    /// annotations and roi files.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(dir) = &self.config.cache_dir {
            info!(dir = %dir.display(), "clearing roidb cache");
            RoidbCache::new(dir.clone()).clear()?;
        }
        Ok(())
    }

    /// export writes the trainer input streams of every image set.
    pub fn export(&self) -> Result<Vec<(CntkInputPaths, StageSummary)>> {
        make_directory(&self.config.cntk_files_dir)?;
        let export = CntkExport::new(&self.config.export, self.config.num_classes())?;
        let mut outputs = Vec::new();

        for image_set in &self.config.image_sets {
            let mut summary = StageSummary::default();
            let imdb = Imdb::load_with(&self.config, image_set, |image, e| {
                self.handle_failure(image, e, &mut summary)
            })?;
            info!(set = %imdb.name, images = imdb.num_images(), "exporting image set");

            let paths = CntkInputPaths::new(&self.config.cntk_files_dir, &image_set.name);
            let mut writer = CntkWriter::create(paths)?;

            for (img_index, entry) in imdb.roidb.iter().enumerate() {
                if img_index % PROGRESS_EVERY == 0 {
                    info!(
                        set = %imdb.name,
                        image = img_index,
                        total = imdb.num_images(),
                        "processing image set"
                    );
                }
                // indices stay dense over the images actually written
                match export.call(summary.processed, entry) {
                    Ok(record) => {
                        writer.write(&record)?;
                        summary.processed += 1;
                    }
                    Err(e) => self.handle_failure(&entry.image_path, e, &mut summary)?,
                }
            }

            let paths = writer.finish()?;
            outputs.push((paths, summary));
        }
        Ok(outputs)
    }
}

/// check_training_inputs verifies that the files the trainer reads for
/// `image_set` exist, naming every missing one.
pub fn check_training_inputs(cntk_files_dir: &Path, image_set: &str) -> Result<CntkInputPaths> {
    let paths = CntkInputPaths::new(cntk_files_dir, image_set);
    let missing = paths.missing();
    if !missing.is_empty() {
        return Err(Error::MissingInputs {
            paths: missing,
            hint: "Run the `export` stage to regenerate them".to_string(),
        });
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_training_inputs_names_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "").unwrap();
        match check_training_inputs(dir.path(), "test") {
            Err(Error::MissingInputs { paths, .. }) => {
                assert_eq!(paths.len(), 2);
                assert!(paths[0].ends_with("test.rois.txt"));
                assert!(paths[1].ends_with("test.roilabels.txt"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = PipelineConfig::new();
        config.classes.clear();
        assert!(FrcnnPipeline::new(config).is_err());
    }
}
