//! Checkpoint management for training runs
//!
//! A checkpoint is a directory holding both networks' weights, a JSON
//! metadata file and the metrics history. Saves go through a temporary
//! directory and a final rename so a crash never leaves a half-written
//! checkpoint behind.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::MapGan;
use crate::training::TrainingMetrics;

const GENERATOR_FILE: &str = "generator.pt";
const CRITIC_FILE: &str = "critic.pt";
const META_FILE: &str = "meta.json";
const METRICS_FILE: &str = "metrics.csv";

/// Checkpoint metadata
///
/// The generator and critic epochs are recorded separately and must agree;
/// a mismatch means the networks were saved at different points and the
/// adversarial balance cannot be restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub gen_epoch: usize,
    pub critic_epoch: usize,
    pub val_loss: f64,
    pub g_loss: f64,
    pub d_loss: f64,
    pub map_type: String,
    pub timestamp: String,
}

/// Save a checkpoint for `epoch` under `dir`.
///
/// Returns the path of the finished checkpoint directory.
pub fn save_checkpoint(
    gan: &MapGan,
    metrics: &TrainingMetrics,
    epoch: usize,
    val_loss: f64,
    dir: &str,
) -> Result<String> {
    std::fs::create_dir_all(dir)?;

    let name = checkpoint_name(epoch, val_loss);
    let final_path = Path::new(dir).join(&name);
    let tmp_path = Path::new(dir).join(format!(".{}.tmp", name));

    if tmp_path.exists() {
        std::fs::remove_dir_all(&tmp_path)?;
    }
    std::fs::create_dir_all(&tmp_path)?;

    gan.save(
        tmp_path.join(GENERATOR_FILE).to_str().unwrap_or_default(),
        tmp_path.join(CRITIC_FILE).to_str().unwrap_or_default(),
    )?;

    let meta = CheckpointMeta {
        gen_epoch: epoch,
        critic_epoch: epoch,
        val_loss,
        g_loss: metrics.latest_g_loss().unwrap_or(f64::NAN),
        d_loss: metrics.latest_d_loss().unwrap_or(f64::NAN),
        map_type: gan.map_type().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };
    let meta_json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(tmp_path.join(META_FILE), meta_json)?;

    metrics.save_csv(tmp_path.join(METRICS_FILE).to_str().unwrap_or_default())?;

    // Rename over any existing checkpoint for the same epoch
    if final_path.exists() {
        std::fs::remove_dir_all(&final_path)?;
    }
    std::fs::rename(&tmp_path, &final_path)?;

    info!("Checkpoint for epoch {} written", epoch);
    Ok(final_path.to_string_lossy().into_owned())
}

/// Load a checkpoint directory into `gan`.
///
/// Returns the epoch the checkpoint was taken at and the metrics history,
/// so training can resume at epoch + 1 with the curves intact.
pub fn load_checkpoint(gan: &mut MapGan, path: &Path) -> Result<(usize, TrainingMetrics)> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let meta_json = std::fs::read_to_string(path.join(META_FILE))?;
    let meta: CheckpointMeta = serde_json::from_str(&meta_json)?;

    if meta.gen_epoch != meta.critic_epoch {
        return Err(Error::Consistency(format!(
            "generator is at epoch {} but critic is at epoch {} in {}",
            meta.gen_epoch,
            meta.critic_epoch,
            path.display()
        )));
    }

    gan.load(
        path.join(GENERATOR_FILE).to_str().unwrap_or_default(),
        path.join(CRITIC_FILE).to_str().unwrap_or_default(),
    )?;

    let metrics_path = path.join(METRICS_FILE);
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(metrics_path.to_str().unwrap_or_default())?
    } else {
        TrainingMetrics::new()
    };

    info!("Loaded checkpoint from epoch {}", meta.gen_epoch);
    Ok((meta.gen_epoch, metrics))
}

/// Read only the metadata of a checkpoint.
pub fn read_checkpoint_meta(path: &Path) -> Result<CheckpointMeta> {
    let meta_json = std::fs::read_to_string(path.join(META_FILE))?;
    Ok(serde_json::from_str(&meta_json)?)
}

/// Path of the generator weights inside a checkpoint directory.
pub fn generator_weights_path(checkpoint: &Path) -> PathBuf {
    checkpoint.join(GENERATOR_FILE)
}

/// Find the checkpoint with the highest epoch number under `dir`.
pub fn find_latest_checkpoint(dir: &str) -> Result<Option<PathBuf>> {
    let dir = Path::new(dir);
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(usize, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(epoch) = parse_checkpoint_name(&name.to_string_lossy()) else {
            continue;
        };
        if latest.as_ref().map(|(e, _)| epoch > *e).unwrap_or(true) {
            latest = Some((epoch, entry.path()));
        }
    }

    Ok(latest.map(|(_, p)| p))
}

fn checkpoint_name(epoch: usize, val_loss: f64) -> String {
    format!("checkpoint_epoch_{:04}_val_{:.4}", epoch, val_loss)
}

fn parse_checkpoint_name(name: &str) -> Option<usize> {
    name.strip_prefix("checkpoint_epoch_")?
        .split('_')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{MapType, ModelConfig};
    use tch::{Device, Kind, Tensor};
    use tempfile::tempdir;

    fn small_gan() -> MapGan {
        MapGan::from_config(
            &ModelConfig {
                gen_base_filters: 4,
                critic_base_filters: 4,
                dropout: 0.0,
            },
            MapType::Depth,
            Device::Cpu,
        )
    }

    fn small_metrics() -> TrainingMetrics {
        let mut m = TrainingMetrics::new();
        m.record_epoch(1.0, -0.5, 0.3, -0.2, 0.4);
        m
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let gan = small_gan();
        let path = save_checkpoint(&gan, &small_metrics(), 3, 0.4, dir_str).unwrap();

        let mut restored = small_gan();
        let (epoch, metrics) = load_checkpoint(&mut restored, Path::new(&path)).unwrap();
        assert_eq!(epoch, 3);
        assert_eq!(metrics.num_epochs(), 1);

        let input = Tensor::randn([1, 1, 64, 64], (Kind::Float, Device::Cpu));
        let diff: f64 = (gan.predict(&input) - restored.predict(&input))
            .abs()
            .max()
            .double_value(&[]);
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_epoch_mismatch_is_consistency_error() {
        let dir = tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let gan = small_gan();
        let path = save_checkpoint(&gan, &small_metrics(), 2, 0.4, dir_str).unwrap();

        // Tamper with the metadata so the epochs disagree
        let meta_path = Path::new(&path).join(META_FILE);
        let mut meta: CheckpointMeta =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta.critic_epoch = 7;
        std::fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let mut restored = small_gan();
        let err = load_checkpoint(&mut restored, Path::new(&path)).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_missing_checkpoint_is_not_found() {
        let dir = tempdir().unwrap();
        let mut gan = small_gan();
        let err = load_checkpoint(&mut gan, &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let dir = tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        assert!(find_latest_checkpoint(dir_str).unwrap().is_none());

        let gan = small_gan();
        save_checkpoint(&gan, &small_metrics(), 1, 0.5, dir_str).unwrap();
        save_checkpoint(&gan, &small_metrics(), 4, 0.3, dir_str).unwrap();
        save_checkpoint(&gan, &small_metrics(), 2, 0.4, dir_str).unwrap();

        let latest = find_latest_checkpoint(dir_str).unwrap().unwrap();
        assert!(latest.ends_with("checkpoint_epoch_0004_val_0.3000"));
    }

    #[test]
    fn test_checkpoint_name_carries_epoch_and_val_loss() {
        let dir = tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let gan = small_gan();
        let path = save_checkpoint(&gan, &small_metrics(), 7, 0.3125, dir_str).unwrap();

        let name = Path::new(&path).file_name().unwrap().to_string_lossy();
        assert_eq!(name, "checkpoint_epoch_0007_val_0.3125");
        assert_eq!(parse_checkpoint_name(&name), Some(7));
    }

    #[test]
    fn test_load_named_checkpoint_not_latest() {
        let dir = tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let gan = small_gan();
        let older = save_checkpoint(&gan, &small_metrics(), 1, 0.5, dir_str).unwrap();
        save_checkpoint(&gan, &small_metrics(), 4, 0.3, dir_str).unwrap();

        // Loading an explicitly named checkpoint resumes at its epoch, not
        // the latest one.
        let mut restored = small_gan();
        let (epoch, _) = load_checkpoint(&mut restored, Path::new(&older)).unwrap();
        assert_eq!(epoch, 1);
    }
}
