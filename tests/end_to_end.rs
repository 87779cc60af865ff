use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};

use rs_frcnn_pipeline::dataset::imdb::ROI_SUFFIX;
use rs_frcnn_pipeline::pipeline::frcnn_pipeline::config::{ImageSetConfig, PipelineConfig, BACKGROUND_CLASS};
use rs_frcnn_pipeline::pipeline::frcnn_pipeline::pipeline::{check_training_inputs, FrcnnPipeline};
use rs_frcnn_pipeline::pipeline::module::roi_generation::read_roi_file;
use rs_frcnn_pipeline::Error;

const NR_ROIS: usize = 50;

fn two_block_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([220, 30, 30])
        } else {
            Rgb([30, 30, 220])
        }
    })
}

fn write_dataset(root: &Path) {
    let positive = root.join("img/positive");
    let negative = root.join("img/negative");
    fs::create_dir_all(&positive).unwrap();
    fs::create_dir_all(&negative).unwrap();

    two_block_image(120, 80).save(positive.join("a.png")).unwrap();
    fs::write(positive.join("a.bboxes.tsv"), "2\t2\t58\t76\n62\t2\t117\t76\n").unwrap();
    fs::write(positive.join("a.bboxes.labels.tsv"), "red\nblue\n").unwrap();

    RgbImage::from_pixel(90, 60, Rgb([128, 128, 128]))
        .save(negative.join("b.png"))
        .unwrap();
}

fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new();
    config.dataset_name = "blocks".to_string();
    config.img_dir = root.join("img");
    config.roi_dir = root.join("rois");
    config.cntk_files_dir = root.join("cntkFiles");
    config.image_extension = "png".to_string();
    config.classes = vec![BACKGROUND_CLASS.to_string(), "red".to_string(), "blue".to_string()];
    config.image_sets = vec![ImageSetConfig {
        name: "train".to_string(),
        sub_dirs: vec!["positive".to_string(), "negative".to_string()],
    }];
    config.roi_generation.max_img_dim = 60;
    config.export.pad_width = 100;
    config.export.pad_height = 100;
    config.export.nr_rois = NR_ROIS;
    config
}

fn values(line: &str, tag: &str) -> Vec<f32> {
    let (_, rest) = line.split_once(tag).unwrap();
    rest.split_whitespace().map(|v| v.parse().unwrap()).collect()
}

#[test]
fn test_generate_then_export() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let pipeline = FrcnnPipeline::new(config(dir.path())).unwrap();

    let summary = pipeline.generate_rois().unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0);

    for (sub_dir, stem, width, height) in [("positive", "a", 120.0, 80.0), ("negative", "b", 90.0, 60.0)] {
        let roi_path = dir.path().join("rois").join(sub_dir).join(format!("{}{}", stem, ROI_SUFFIX));
        let rois = read_roi_file(&roi_path).unwrap();
        assert!(!rois.is_empty());
        for r in rois {
            assert!(r.x1 >= 0.0 && r.x1 < r.x2 && r.x2 < width, "{:?}", r);
            assert!(r.y1 >= 0.0 && r.y1 < r.y2 && r.y2 < height, "{:?}", r);
        }
    }

    let outputs = pipeline.export().unwrap();
    assert_eq!(outputs.len(), 1);
    let (paths, summary) = &outputs[0];
    assert_eq!(summary.processed, 2);

    let images = fs::read_to_string(&paths.images).unwrap();
    let image_lines: Vec<&str> = images.lines().collect();
    assert_eq!(image_lines.len(), 2);
    assert!(image_lines[0].starts_with("0\t"));
    assert!(image_lines[0].ends_with("a.png\t0"));
    assert!(image_lines[1].starts_with("1\t"));

    let rois = fs::read_to_string(&paths.rois).unwrap();
    let labels = fs::read_to_string(&paths.labels).unwrap();
    let targets = fs::read_to_string(&paths.regr_targets).unwrap();

    for (index, line) in rois.lines().enumerate() {
        assert!(line.starts_with(&format!("{} |rois ", index)));
        let coords = values(line, "|rois");
        assert_eq!(coords.len(), 4 * NR_ROIS);
        assert!(coords.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    let label_lines: Vec<&str> = labels.lines().collect();
    let target_lines: Vec<&str> = targets.lines().collect();
    assert_eq!(label_lines.len(), 2);
    assert_eq!(target_lines.len(), 2);

    for (label_line, target_line) in label_lines.iter().zip(target_lines.iter()) {
        let one_hot = values(label_line, "|roiLabels");
        let regr = values(target_line, "|regrTarget");
        assert_eq!(one_hot.len(), 3 * NR_ROIS);
        assert_eq!(regr.len(), 4 * NR_ROIS);
        for (label, target) in one_hot.chunks(3).zip(regr.chunks(4)) {
            assert_eq!(label.iter().sum::<f32>(), 1.0);
            if label[0] == 1.0 {
                assert!(target.iter().all(|&t| t == 0.0));
            }
        }
    }

    // ground truth comes first, so the positive image starts with red, blue
    let first = values(label_lines[0], "|roiLabels");
    assert_eq!(&first[0..6], &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    // the negative image has no object labels at all
    let second = values(label_lines[1], "|roiLabels");
    assert!(second.chunks(3).all(|l| l[0] == 1.0));

    assert!(check_training_inputs(&dir.path().join("cntkFiles"), "train").is_ok());
}

#[test]
fn test_export_with_cache_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let mut config = config(dir.path());
    config.cache_dir = Some(dir.path().join("cache"));
    let pipeline = FrcnnPipeline::new(config).unwrap();
    pipeline.generate_rois().unwrap();

    let first = pipeline.export().unwrap();
    let rois_first = fs::read_to_string(&first[0].0.rois).unwrap();
    assert!(dir.path().join("cache/train/positive/a.boxes.npy").exists());

    let second = pipeline.export().unwrap();
    let rois_second = fs::read_to_string(&second[0].0.rois).unwrap();
    assert_eq!(rois_first, rois_second);

    pipeline.clear_cache().unwrap();
    assert!(!dir.path().join("cache").exists());
}

#[test]
fn test_export_without_rois_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let pipeline = FrcnnPipeline::new(config(dir.path())).unwrap();

    match pipeline.export() {
        Err(Error::MissingInputs { paths, .. }) => {
            assert!(paths[0].ends_with(format!("positive/a{}", ROI_SUFFIX)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_skip_failed_images() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    fs::write(dir.path().join("img/negative/broken.png"), b"not a png").unwrap();

    let pipeline = FrcnnPipeline::new(config(dir.path())).unwrap();
    assert!(pipeline.generate_rois().is_err());

    let mut config = config(dir.path());
    config.skip_failed_images = true;
    let pipeline = FrcnnPipeline::new(config).unwrap();
    let summary = pipeline.generate_rois().unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);

    let outputs = pipeline.export().unwrap();
    let (paths, summary) = &outputs[0];
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);

    let images = fs::read_to_string(&paths.images).unwrap();
    let lines: Vec<&str> = images.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("0\t") && lines[0].ends_with("a.png\t0"));
    assert!(lines[1].starts_with("1\t") && lines[1].ends_with("b.png\t0"));
    let rois = fs::read_to_string(&paths.rois).unwrap();
    assert!(rois.lines().nth(1).unwrap().starts_with("1 |rois "));
}

fn exported_roi_count(rois_line: &str) -> usize {
    values(rois_line, "|rois")
        .chunks(4)
        .filter(|roi| roi.iter().any(|&v| v != 0.0))
        .count()
}

#[test]
fn test_regenerating_rois_invalidates_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let mut config = config(dir.path());
    config.cache_dir = Some(dir.path().join("cache"));
    let roi_path = dir.path().join("rois/positive").join(format!("a{}", ROI_SUFFIX));

    let pipeline = FrcnnPipeline::new(config.clone()).unwrap();
    pipeline.generate_rois().unwrap();
    let first = pipeline.export().unwrap();
    let rois = fs::read_to_string(&first[0].0.rois).unwrap();
    let expected = (read_roi_file(&roi_path).unwrap().len() + 2).min(NR_ROIS);
    assert_eq!(exported_roi_count(rois.lines().next().unwrap()), expected);
    assert!(dir.path().join("cache/train/positive/a.boxes.npy").exists());

    config.roi_generation.add_grid_rois = false;
    let pipeline = FrcnnPipeline::new(config).unwrap();
    pipeline.generate_rois().unwrap();
    assert!(!dir.path().join("cache").exists());

    let second = pipeline.export().unwrap();
    let rois = fs::read_to_string(&second[0].0.rois).unwrap();
    let proposals = read_roi_file(&roi_path).unwrap().len();
    assert_eq!(exported_roi_count(rois.lines().next().unwrap()), (proposals + 2).min(NR_ROIS));
}
