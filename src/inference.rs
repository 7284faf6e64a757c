//! Inference path: translate sketches into maps on disk
//!
//! Predictions are rescaled from the generator's [-1, 1] range to [0, 1] and
//! written as EXR files named after the input sketch. When ground-truth
//! targets are available a side-by-side comparison PNG is written next to
//! each map.

use std::path::{Path, PathBuf};
use tch::Tensor;
use tracing::{info, warn};

use crate::data::{image_io, DataLoader};
use crate::error::{Error, Result};
use crate::model::{Generator, MapGan};
use crate::utils::MapType;

/// Anything that can turn a batch of sketches into a batch of maps.
///
/// Implemented by the trained model; test doubles implement it to exercise
/// the output plumbing without weights.
pub trait SketchMapper {
    /// Map a [N, C, H, W] sketch batch to a [N, C', H, W] map batch in [-1, 1].
    fn predict(&self, sketches: &Tensor) -> Tensor;
}

impl SketchMapper for MapGan {
    fn predict(&self, sketches: &Tensor) -> Tensor {
        MapGan::predict(self, sketches)
    }
}

impl SketchMapper for Generator {
    fn predict(&self, sketches: &Tensor) -> Tensor {
        tch::no_grad(|| self.generate(sketches))
    }
}

/// Outcome of an inference run.
#[derive(Debug, Default)]
pub struct InferenceSummary {
    /// Paths of the maps that were written
    pub written: Vec<PathBuf>,
    /// Inputs whose map could not be written, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

impl InferenceSummary {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run a mapper over every sample in `loader` and write the results.
///
/// A failure on one sample is recorded in the summary and the run continues;
/// only loader-level errors abort.
pub fn run_inference<M: SketchMapper>(
    mapper: &M,
    loader: &mut DataLoader,
    output_dir: &Path,
    device: tch::Device,
) -> Result<InferenceSummary> {
    std::fs::create_dir_all(output_dir)?;

    let map_type = loader.dataset().map_type();
    let size = loader.dataset().image_size();
    let channels = map_type.out_channels() as usize;
    let per_sample = channels * (size as usize) * (size as usize);

    let mut summary = InferenceSummary::default();

    for batch in loader.iter() {
        let batch = batch?;
        let input = batch.input.to_device(device);
        let pred = mapper.predict(&input);

        let pred_data: Vec<f32> = pred.flatten(0, -1).try_into()?;
        let target_data: Option<Vec<f32>> = match &batch.target {
            Some(t) => Some(t.flatten(0, -1).try_into()?),
            None => None,
        };

        for (i, input_path) in batch.input_paths.iter().enumerate() {
            let sample = &pred_data[i * per_sample..(i + 1) * per_sample];
            match write_sample(
                output_dir,
                input_path,
                sample,
                target_data.as_deref().map(|t| &t[i * per_sample..(i + 1) * per_sample]),
                map_type,
                size,
            ) {
                Ok(path) => summary.written.push(path),
                Err(e) => {
                    warn!("Failed to write map for {}: {}", input_path.display(), e);
                    summary.failures.push((input_path.clone(), e.to_string()));
                }
            }
        }
    }

    info!(
        "Inference complete: {} maps written, {} failures",
        summary.written.len(),
        summary.failures.len()
    );
    Ok(summary)
}

/// Write one predicted map (and its comparison image when a target exists).
fn write_sample(
    output_dir: &Path,
    input_path: &Path,
    pred: &[f32],
    target: Option<&[f32]>,
    map_type: MapType,
    size: u32,
) -> Result<PathBuf> {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Data(format!("unusable file name: {}", input_path.display())))?;

    // [-1, 1] -> [0, 1] for storage
    let rescaled: Vec<f32> = pred.iter().map(|v| (v + 1.0) / 2.0).collect();
    let exr_path = output_dir.join(format!("{}.exr", stem));
    image_io::write_map_exr(&exr_path, &rescaled, map_type, size)?;

    if let Some(target) = target {
        let channels = map_type.out_channels() as usize;
        let (h, w) = (size as usize, size as usize);
        if let (Some(p), Some(t)) = (
            image_io::chw_to_rgb8(pred, channels, h, w),
            image_io::chw_to_rgb8(target, channels, h, w),
        ) {
            let png_path = output_dir.join(format!("{}_comparison.png", stem));
            image_io::side_by_side(&p, &t).save(&png_path)?;
        }
    }

    Ok(exr_path)
}
