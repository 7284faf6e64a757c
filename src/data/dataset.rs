//! Sketch/map datasets
//!
//! Two variants resolved at construction: a paired dataset for training and
//! validation (sketch + ground-truth map) and an input-only dataset for
//! inference. Pairing is positional: index `i` of the sorted input listing
//! corresponds to index `i` of the sorted target listing.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::data::image_io;
use crate::error::{Error, Result};
use crate::utils::MapType;

/// One decoded sample. `target` is absent for inference-mode datasets.
#[derive(Debug, Clone)]
pub struct Sample {
    /// CHW sketch data in [-1, 1]
    pub input: Vec<f32>,
    /// CHW target map data, present only for paired datasets
    pub target: Option<Vec<f32>>,
    pub input_path: PathBuf,
    pub target_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum Pairing {
    /// Training/validation: one target path per input path.
    Paired(Vec<PathBuf>),
    /// Inference: sketches only.
    InputOnly,
}

/// Dataset over a directory tree of sketches, optionally paired with targets.
#[derive(Debug, Clone)]
pub struct MapDataset {
    map_type: MapType,
    image_size: u32,
    input_paths: Vec<PathBuf>,
    pairing: Pairing,
}

impl MapDataset {
    /// Create a paired training/validation dataset.
    ///
    /// Fails with a data error if either directory is missing or empty, or if
    /// the listings disagree in length.
    pub fn paired(
        input_dir: &Path,
        target_dir: &Path,
        map_type: MapType,
        image_size: u32,
    ) -> Result<Self> {
        let input_paths = list_images(input_dir)?;
        let target_paths = list_images(target_dir)?;

        if input_paths.len() != target_paths.len() {
            return Err(Error::Data(format!(
                "input listing has {} files but target listing has {} ({} vs {})",
                input_paths.len(),
                target_paths.len(),
                input_dir.display(),
                target_dir.display()
            )));
        }

        Ok(Self {
            map_type,
            image_size,
            input_paths,
            pairing: Pairing::Paired(target_paths),
        })
    }

    /// Create an input-only inference dataset.
    pub fn input_only(input_dir: &Path, map_type: MapType, image_size: u32) -> Result<Self> {
        let input_paths = list_images(input_dir)?;
        Ok(Self {
            map_type,
            image_size,
            input_paths,
            pairing: Pairing::InputOnly,
        })
    }

    pub fn len(&self) -> usize {
        self.input_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_paths.is_empty()
    }

    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Whether samples carry ground-truth targets.
    pub fn has_targets(&self) -> bool {
        matches!(self.pairing, Pairing::Paired(_))
    }

    /// Input path for sample `index` without decoding it.
    pub fn input_path(&self, index: usize) -> Option<&PathBuf> {
        self.input_paths.get(index)
    }

    /// Decode sample `index`.
    pub fn get(&self, index: usize) -> Result<Sample> {
        let input_path = self
            .input_paths
            .get(index)
            .ok_or_else(|| Error::Data(format!("sample index {} out of range", index)))?
            .clone();

        let input = image_io::load_sketch(&input_path, self.map_type, self.image_size)?;

        let (target, target_path) = match &self.pairing {
            Pairing::Paired(targets) => {
                let target_path = targets[index].clone();
                let target = image_io::load_target(&target_path, self.map_type, self.image_size)?;
                (Some(target), Some(target_path))
            }
            Pairing::InputOnly => (None, None),
        };

        Ok(Sample {
            input,
            target,
            input_path,
            target_path,
        })
    }

    /// Split off the tail of the dataset as a validation set.
    ///
    /// The split is deterministic (last `val_fraction` of the sorted listing)
    /// so input/target pairing is preserved across both halves. With a
    /// positive fraction and at least two samples, both halves are non-empty.
    pub fn split(self, val_fraction: f64) -> (Self, Self) {
        let n = self.input_paths.len();
        let mut n_val = (n as f64 * val_fraction).round() as usize;
        if val_fraction > 0.0 && n >= 2 {
            n_val = n_val.clamp(1, n - 1);
        } else {
            n_val = n_val.min(n.saturating_sub(1));
        }
        let n_train = n - n_val;

        let (train_inputs, val_inputs) = {
            let mut inputs = self.input_paths;
            let val = inputs.split_off(n_train);
            (inputs, val)
        };

        let (train_pairing, val_pairing) = match self.pairing {
            Pairing::Paired(mut targets) => {
                let val = targets.split_off(n_train);
                (Pairing::Paired(targets), Pairing::Paired(val))
            }
            Pairing::InputOnly => (Pairing::InputOnly, Pairing::InputOnly),
        };

        (
            Self {
                map_type: self.map_type,
                image_size: self.image_size,
                input_paths: train_inputs,
                pairing: train_pairing,
            },
            Self {
                map_type: self.map_type,
                image_size: self.image_size,
                input_paths: val_inputs,
                pairing: val_pairing,
            },
        )
    }
}

/// Recursively list image files under `dir` in lexicographic order.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(Error::NotFound(dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .map(|ext| {
                    matches!(
                        ext.to_lowercase().as_str(),
                        "png" | "jpg" | "jpeg" | "bmp" | "tiff" | "exr"
                    )
                })
                .unwrap_or(false)
        })
        .collect();

    paths.sort();

    if paths.is_empty() {
        return Err(Error::Data(format!(
            "no image files found in {}",
            dir.display()
        )));
    }
    Ok(paths)
}
