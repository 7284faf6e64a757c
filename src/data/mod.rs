//! Data module for sketch/map datasets
//!
//! This module provides:
//! - Paired and input-only dataset variants over directory trees
//! - Batching with shuffling and background prefetching
//! - PNG/EXR codec helpers

pub mod dataset;
pub mod image_io;
pub mod loader;

pub use dataset::{MapDataset, Sample};
pub use loader::{Batch, DataLoader};
