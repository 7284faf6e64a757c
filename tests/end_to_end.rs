//! End-to-end tests: a short training run on synthetic data, resuming from a
//! checkpoint, and inference with a trained model.

use std::path::Path;
use tch::Device;
use tempfile::tempdir;

use sketch2map::training::MemorySink;
use sketch2map::utils::config::ModelConfig;
use sketch2map::{
    find_latest_checkpoint, load_checkpoint, run_inference, DataLoader, MapDataset, MapGan,
    MapType, Trainer, TrainerConfig,
};

const SIZE: u32 = 64;

fn write_sketch(path: &Path, seed: u8) {
    let mut img = image::RgbImage::new(SIZE, SIZE);
    for (x, y, p) in img.enumerate_pixels_mut() {
        p.0 = [
            seed.wrapping_add(x as u8),
            seed.wrapping_add(y as u8),
            seed,
        ];
    }
    img.save(path).unwrap();
}

fn write_target(path: &Path, seed: f32) {
    let mut img = image::Rgb32FImage::new(SIZE, SIZE);
    for (x, y, p) in img.enumerate_pixels_mut() {
        let v = (seed + (x + y) as f32 / (2.0 * SIZE as f32)).fract();
        p.0 = [v, 1.0 - v, 0.5];
    }
    image::DynamicImage::ImageRgb32F(img).save(path).unwrap();
}

fn make_paired_dirs(root: &Path, n: usize) -> (std::path::PathBuf, std::path::PathBuf) {
    let input_dir = root.join("sketches");
    let target_dir = root.join("maps");
    std::fs::create_dir_all(&input_dir).unwrap();
    std::fs::create_dir_all(&target_dir).unwrap();

    for i in 0..n {
        write_sketch(&input_dir.join(format!("{:02}.png", i)), (i * 30) as u8);
        write_target(&target_dir.join(format!("{:02}.exr", i)), i as f32 / n as f32);
    }
    (input_dir, target_dir)
}

fn small_trainer_config(root: &Path, epochs: usize) -> TrainerConfig {
    TrainerConfig {
        epochs,
        lr: 1e-4,
        n_critic: 2,
        weight_l1: 10.0,
        gradient_penalty_coefficient: 10.0,
        checkpoint_every: 100,
        checkpoint_dir: root.join("checkpoints").to_string_lossy().into_owned(),
        output_dir: root.join("output").to_string_lossy().into_owned(),
        grid_samples: 2,
        prefetch_depth: 2,
    }
}

fn small_model() -> ModelConfig {
    ModelConfig {
        gen_base_filters: 4,
        critic_base_filters: 4,
        dropout: 0.0,
    }
}

#[test]
fn training_run_produces_checkpoint_and_finite_losses() {
    let dir = tempdir().unwrap();
    let (input_dir, target_dir) = make_paired_dirs(dir.path(), 4);

    let dataset = MapDataset::paired(&input_dir, &target_dir, MapType::Normal, SIZE).unwrap();
    let (train_ds, val_ds) = dataset.split(0.25);
    let mut train_loader = DataLoader::new(train_ds, 2, true, true);
    let mut val_loader = DataLoader::new(val_ds, 2, false, false);

    let mut gan = MapGan::from_config(&small_model(), MapType::Normal, Device::Cpu);
    let config = small_trainer_config(dir.path(), 1);
    let checkpoint_dir = config.checkpoint_dir.clone();
    let output_dir = config.output_dir.clone();
    let mut trainer = Trainer::new(config, Device::Cpu).unwrap();

    let mut sink = MemorySink::new();
    let metrics = trainer
        .train(&mut gan, &mut train_loader, &mut val_loader, 0, &mut sink)
        .unwrap()
        .clone();

    assert_eq!(metrics.num_epochs(), 1);
    assert!(metrics.latest_d_loss().unwrap().is_finite());
    assert!(metrics.latest_val_loss().unwrap().is_finite());

    // every logged scalar is finite
    for (name, value, _, _) in &sink.records {
        assert!(value.is_finite(), "{} was not finite", name);
    }
    assert!(!sink.series("d_loss").is_empty());

    // the only checkpoint is the final (and best) epoch 0, named by epoch
    // and validation loss
    let latest = find_latest_checkpoint(&checkpoint_dir).unwrap().unwrap();
    let name = latest.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("checkpoint_epoch_0000_val_"), "{}", name);
    assert!(name.contains(&format!("val_{:.4}", metrics.latest_val_loss().unwrap())));
    assert_eq!(
        std::fs::read_dir(&checkpoint_dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_dir())
            .count(),
        1
    );

    // a validation comparison grid was written
    assert!(Path::new(&output_dir)
        .join("epoch_0000_predicted_and_target.png")
        .exists());
}

#[test]
fn resume_continues_at_the_next_epoch() {
    let dir = tempdir().unwrap();
    let (input_dir, target_dir) = make_paired_dirs(dir.path(), 4);

    let build_loaders = || {
        let dataset = MapDataset::paired(&input_dir, &target_dir, MapType::Normal, SIZE).unwrap();
        let (train_ds, val_ds) = dataset.split(0.25);
        (
            DataLoader::new(train_ds, 2, true, true),
            DataLoader::new(val_ds, 2, false, false),
        )
    };

    // first run: one epoch
    let (mut train_loader, mut val_loader) = build_loaders();
    let mut gan = MapGan::from_config(&small_model(), MapType::Normal, Device::Cpu);
    let mut trainer =
        Trainer::new(small_trainer_config(dir.path(), 1), Device::Cpu).unwrap();
    trainer
        .train(&mut gan, &mut train_loader, &mut val_loader, 0, &mut sketch2map::training::NullSink)
        .unwrap();
    let checkpoint_dir = trainer.config().checkpoint_dir.clone();

    // second run: resume into a fresh model and train to epoch 2
    let latest = find_latest_checkpoint(&checkpoint_dir).unwrap().unwrap();
    let mut resumed = MapGan::from_config(&small_model(), MapType::Normal, Device::Cpu);
    let (epoch, metrics) = load_checkpoint(&mut resumed, &latest).unwrap();
    assert_eq!(epoch, 0);
    assert_eq!(metrics.num_epochs(), 1);

    let (mut train_loader, mut val_loader) = build_loaders();
    let mut trainer =
        Trainer::new(small_trainer_config(dir.path(), 2), Device::Cpu).unwrap();
    trainer.set_metrics(metrics);
    let metrics = trainer
        .train(
            &mut resumed,
            &mut train_loader,
            &mut val_loader,
            epoch + 1,
            &mut sketch2map::training::NullSink,
        )
        .unwrap();

    assert_eq!(metrics.num_epochs(), 2);
    let latest = find_latest_checkpoint(&checkpoint_dir).unwrap().unwrap();
    assert!(latest
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("checkpoint_epoch_0001_val_"));
}

#[test]
fn inference_with_trained_model_writes_maps_in_range() {
    let dir = tempdir().unwrap();
    let input_dir = dir.path().join("sketches");
    let out_dir = dir.path().join("generated");
    std::fs::create_dir_all(&input_dir).unwrap();
    for i in 0..3 {
        write_sketch(&input_dir.join(format!("{}.png", i)), (i * 70) as u8);
    }

    let gan = MapGan::from_config(&small_model(), MapType::Normal, Device::Cpu);
    let dataset = MapDataset::input_only(&input_dir, MapType::Normal, SIZE).unwrap();
    let mut loader = DataLoader::new(dataset, 2, false, false);

    let summary = run_inference(&gan, &mut loader, &out_dir, Device::Cpu).unwrap();
    assert!(summary.all_ok());
    assert_eq!(summary.written.len(), 3);

    for i in 0..3 {
        let path = out_dir.join(format!("{}.exr", i));
        assert!(path.exists());
        let data =
            sketch2map::data::image_io::read_map_exr(&path, MapType::Normal, SIZE).unwrap();
        // tanh output rescaled to [0, 1]
        for v in data {
            assert!((-0.01..=1.01).contains(&v), "{}", v);
        }
    }
}
