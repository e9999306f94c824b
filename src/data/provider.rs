use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::InMemDataset;
use burn::tensor::backend::Backend;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ExperimentConfig;
use crate::data::batchitem::Batch;
use crate::data::scaler::StandardScaler;
use crate::data::window::{sliding_windows, WindowBatcher, WindowItem};
use crate::error::{HarnessError, Result};

pub const SERIES_FILE: &str = "series.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    fn index(self) -> usize {
        match self {
            Split::Train => 0,
            Split::Val => 1,
            Split::Test => 2,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        };
        f.write_str(name)
    }
}

/// Source of batches and of the scaler state used to denormalize them.
pub trait DataProvider {
    fn num_nodes(&self) -> usize;

    fn num_features(&self) -> usize;

    /// Scaler fitted for the dataset behind `split`.
    fn scaler(&self, split: Split) -> &StandardScaler;

    fn num_samples(&self, split: Split) -> usize;

    fn batch_size(&self) -> usize;

    fn num_batches(&self, split: Split) -> usize {
        let batch_size = self.batch_size().max(1);
        (self.num_samples(split) + batch_size - 1) / batch_size
    }

    fn loader<B: Backend>(&self, split: Split, device: &B::Device) -> Arc<dyn DataLoader<Batch<B>>>;
}

#[derive(Deserialize)]
struct SeriesFile {
    data: Vec<Vec<Vec<f32>>>, // [T, N, F]
}

/// Sliding-window provider over one normalized multivariate series.
pub struct SeriesProvider {
    seq_len: usize,
    horizon: usize,
    batch_size: usize,
    seed: u64,
    num_nodes: usize,
    num_features: usize,
    scaler: StandardScaler,
    windows: [Vec<WindowItem>; 3],
}

impl SeriesProvider {
    pub fn from_file<P: AsRef<Path>>(root_path: P, config: &ExperimentConfig) -> Result<Self> {
        let path = root_path.as_ref().join(SERIES_FILE);
        let file = File::open(&path).map_err(|err| {
            HarnessError::Data(format!("cannot open {}: {err}", path.display()))
        })?;
        let series: SeriesFile = serde_json::from_reader(BufReader::new(file))?;

        Self::from_series(series.data, config)
    }

    /// Splits `series` chronologically by the configured ratios.
    pub fn from_series(series: Vec<Vec<Vec<f32>>>, config: &ExperimentConfig) -> Result<Self> {
        let len = series.len();
        let num_train = (len as f64 * config.data.train_ratio).round() as usize;
        let num_val = (len as f64 * config.data.val_ratio).round() as usize;
        let num_val = num_val.min(len - num_train.min(len));

        let mut series = series;
        let test = series.split_off((num_train + num_val).min(len));
        let val = series.split_off(num_train.min(len));

        Self::from_splits(series, val, test, config)
    }

    pub fn from_splits(
        train: Vec<Vec<Vec<f32>>>,
        val: Vec<Vec<Vec<f32>>>,
        test: Vec<Vec<Vec<f32>>>,
        config: &ExperimentConfig,
    ) -> Result<Self> {
        let seq_len = config.model.seq_len;
        let horizon = config.model.horizon;

        let (num_nodes, num_features) = train
            .first()
            .map(|step| (step.len(), step.first().map_or(0, |node| node.len())))
            .ok_or_else(|| HarnessError::Data("training split is empty".into()))?;

        for step in train.iter().chain(val.iter()).chain(test.iter()) {
            if step.len() != num_nodes {
                return Err(HarnessError::shape("series nodes", num_nodes, step.len()));
            }
            if let Some(node) = step.iter().find(|node| node.len() != num_features) {
                return Err(HarnessError::shape("series features", num_features, node.len()));
            }
        }

        let scaler = StandardScaler::fit(&train)?;

        let mut splits = [train, val, test];
        for split in splits.iter_mut() {
            scaler.transform(split);
        }
        let [train, val, test] = splits;

        let train = sliding_windows(&train, seq_len, horizon)?;
        let val = sliding_windows(&val, seq_len, horizon)?;
        let test = if test.len() >= seq_len + horizon {
            sliding_windows(&test, seq_len, horizon)?
        } else {
            warn!("Test split of {} steps is too short for one window", test.len());
            Vec::new()
        };

        info!(
            "Windows - train: {}, val: {}, test: {}",
            train.len(),
            val.len(),
            test.len()
        );

        Ok(Self {
            seq_len,
            horizon,
            batch_size: config.data.batch_size,
            seed: config.data.seed,
            num_nodes,
            num_features,
            scaler,
            windows: [train, val, test],
        })
    }
}

impl DataProvider for SeriesProvider {
    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn scaler(&self, _split: Split) -> &StandardScaler {
        &self.scaler
    }

    fn num_samples(&self, split: Split) -> usize {
        self.windows[split.index()].len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn loader<B: Backend>(&self, split: Split, device: &B::Device) -> Arc<dyn DataLoader<Batch<B>>> {
        let batcher = WindowBatcher::<B>::new(
            device.clone(),
            self.seq_len,
            self.horizon,
            self.num_nodes,
            self.num_features,
        );
        let dataset = InMemDataset::new(self.windows[split.index()].clone());
        let builder = DataLoaderBuilder::new(batcher).batch_size(self.batch_size);

        match split {
            Split::Train => builder.shuffle(self.seed).build(dataset),
            Split::Val | Split::Test => builder.build(dataset),
        }
    }
}
