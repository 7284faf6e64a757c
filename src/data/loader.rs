//! DataLoader for batching and iterating over samples
//!
//! Provides batching for adversarial training with support for:
//! - Random shuffling per epoch
//! - Dropping the last incomplete batch
//! - Prefetching batches on a background thread in strict input order

use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tch::Tensor;

use crate::data::MapDataset;
use crate::error::Result;

/// One batch of tensors in CHW layout.
///
/// `target` is None for inference-mode datasets. Tensors are created on the
/// CPU; the trainer moves them to its device.
#[derive(Debug)]
pub struct Batch {
    /// Shape: [batch, in_channels, H, W]
    pub input: Tensor,
    /// Shape: [batch, out_channels, H, W]
    pub target: Option<Tensor>,
    pub input_paths: Vec<PathBuf>,
}

/// DataLoader over a [`MapDataset`].
pub struct DataLoader {
    dataset: Arc<MapDataset>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    indices: Vec<usize>,
    current_idx: usize,
}

impl DataLoader {
    /// Create a new DataLoader.
    pub fn new(dataset: MapDataset, batch_size: usize, shuffle: bool, drop_last: bool) -> Self {
        let indices: Vec<usize> = (0..dataset.len()).collect();

        let mut loader = Self {
            dataset: Arc::new(dataset),
            batch_size,
            shuffle,
            drop_last,
            indices,
            current_idx: 0,
        };

        if shuffle {
            loader.shuffle_indices();
        }

        loader
    }

    /// Number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.indices.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn num_samples(&self) -> usize {
        self.indices.len()
    }

    pub fn dataset(&self) -> &MapDataset {
        &self.dataset
    }

    fn shuffle_indices(&mut self) {
        let mut rng = rand::thread_rng();
        self.indices.shuffle(&mut rng);
    }

    /// Reset for a new epoch.
    pub fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.shuffle_indices();
        }
    }

    /// Load the next batch, or None when the epoch is complete.
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        let n = self.indices.len();
        let start = self.current_idx;
        if start >= n {
            return None;
        }

        let end = (start + self.batch_size).min(n);
        if self.drop_last && end - start < self.batch_size {
            return None;
        }

        let batch = build_batch(&self.dataset, &self.indices[start..end]);
        self.current_idx = end;
        Some(batch)
    }

    /// Iterate over one epoch of batches synchronously.
    pub fn iter(&mut self) -> DataLoaderIter<'_> {
        self.reset();
        DataLoaderIter { loader: self }
    }

    /// Iterate over one epoch with batches decoded on a background thread.
    ///
    /// The worker loads batches sequentially and hands them over a bounded
    /// channel, so ordering matches the synchronous iterator while decoding
    /// overlaps with the training step.
    pub fn prefetch_iter(&mut self, depth: usize) -> PrefetchIter {
        self.reset();

        let dataset = Arc::clone(&self.dataset);
        let indices = self.indices.clone();
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;
        self.current_idx = indices.len();

        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        let handle = thread::spawn(move || {
            let mut start = 0;
            while start < indices.len() {
                let end = (start + batch_size).min(indices.len());
                if drop_last && end - start < batch_size {
                    break;
                }
                let batch = build_batch(&dataset, &indices[start..end]);
                if tx.send(batch).is_err() {
                    // Receiver dropped; stop decoding.
                    return;
                }
                start = end;
            }
        });

        PrefetchIter {
            rx,
            _handle: handle,
        }
    }
}

/// Decode and stack the samples at `indices` into one batch.
fn build_batch(dataset: &MapDataset, indices: &[usize]) -> Result<Batch> {
    let n = indices.len() as i64;
    let size = dataset.image_size() as i64;
    let in_c = dataset.map_type().in_channels();
    let out_c = dataset.map_type().out_channels();

    let mut inputs = Vec::with_capacity((n * in_c * size * size) as usize);
    let mut targets = Vec::with_capacity(if dataset.has_targets() {
        (n * out_c * size * size) as usize
    } else {
        0
    });
    let mut input_paths = Vec::with_capacity(indices.len());

    for &idx in indices {
        let sample = dataset.get(idx)?;
        inputs.extend_from_slice(&sample.input);
        if let Some(target) = &sample.target {
            targets.extend_from_slice(target);
        }
        input_paths.push(sample.input_path);
    }

    let input = Tensor::from_slice(&inputs).view([n, in_c, size, size]);
    let target = if dataset.has_targets() {
        Some(Tensor::from_slice(&targets).view([n, out_c, size, size]))
    } else {
        None
    };

    Ok(Batch {
        input,
        target,
        input_paths,
    })
}

/// Synchronous iterator adapter for DataLoader.
pub struct DataLoaderIter<'a> {
    loader: &'a mut DataLoader,
}

impl Iterator for DataLoaderIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.loader.next_batch()
    }
}

/// Iterator over batches decoded by a background worker.
pub struct PrefetchIter {
    rx: mpsc::Receiver<Result<Batch>>,
    _handle: thread::JoinHandle<()>,
}

impl Iterator for PrefetchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MapType;
    use std::path::Path;
    use tempfile::tempdir;

    fn fixture_dataset(dir: &Path, n: usize) -> MapDataset {
        let input_dir = dir.join("input");
        std::fs::create_dir_all(&input_dir).unwrap();
        for i in 0..n {
            let mut img = image::GrayImage::new(16, 16);
            for p in img.pixels_mut() {
                p[0] = (i * 20) as u8;
            }
            img.save(input_dir.join(format!("{:02}.png", i))).unwrap();
        }
        MapDataset::input_only(&input_dir, MapType::Depth, 16).unwrap()
    }

    #[test]
    fn test_dataloader_basic() {
        let dir = tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 10);
        let mut loader = DataLoader::new(dataset, 3, false, false);

        assert_eq!(loader.num_batches(), 4);

        let sizes: Vec<i64> = loader
            .iter()
            .map(|b| b.unwrap().input.size()[0])
            .collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_dataloader_drop_last() {
        let dir = tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 10);
        let mut loader = DataLoader::new(dataset, 3, false, true);

        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.iter().count(), 3);
    }

    #[test]
    fn test_batch_shape() {
        let dir = tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 4);
        let mut loader = DataLoader::new(dataset, 2, false, true);

        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.input.size(), vec![2, 1, 16, 16]);
        assert!(batch.target.is_none());
        assert_eq!(batch.input_paths.len(), 2);
    }

    #[test]
    fn test_prefetch_matches_sync_order() {
        let dir = tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 6);
        let mut loader = DataLoader::new(dataset, 2, false, true);

        let sync_paths: Vec<_> = loader
            .iter()
            .flat_map(|b| b.unwrap().input_paths)
            .collect();
        let prefetch_paths: Vec<_> = loader
            .prefetch_iter(2)
            .flat_map(|b| b.unwrap().input_paths)
            .collect();

        assert_eq!(sync_paths, prefetch_paths);
    }
}
