use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::CompactRecorder;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use tracing::{debug, info, warn};

use crate::config::{ExperimentConfig, LossStrategy};
use crate::context::ExperimentContext;
use crate::data::{DataProvider, Split, StandardScaler};
use crate::early_stopping::{EarlyStopDecision, EarlyStopping};
use crate::error::{HarnessError, Result};
use crate::graph::GraphData;
use crate::loss::LossAssembler;
use crate::metrics::{MetricEvaluator, Metrics};
use crate::model::ForecastModel;
use crate::reshape::DataReshaper;
use crate::schedule::LrScheduler;

pub const CHECKPOINT_FILE: &str = "checkpoint";
pub const CONFIG_FILE: &str = "config.json";

/// What a model constructor may read when the experiment builds it.
pub struct ModelContext<'a> {
    pub config: &'a ExperimentConfig,
    pub graph: &'a GraphData,
    pub scaler: &'a StandardScaler,
    pub num_nodes: usize,
    pub input_width: usize,
    pub output_dim: usize,
    /// Auxiliary embedding channels per node, 0 when embedding is disabled.
    pub aux_width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    EarlyStopped,
}

#[derive(Debug, Clone)]
pub struct TrainingState {
    pub epoch: usize,
    /// Mean training loss of every finished epoch.
    pub train_losses: Vec<f64>,
    pub val_loss: Option<f64>,
    pub best_val_loss: Option<f64>,
    pub early_stop_counter: usize,
    pub scheduler_steps: usize,
    pub lr: f64,
    pub stop_reason: Option<StopReason>,
}

impl TrainingState {
    fn new(lr: f64) -> Self {
        Self {
            epoch: 0,
            train_losses: Vec::new(),
            val_loss: None,
            best_val_loss: None,
            early_stop_counter: 0,
            scheduler_steps: 0,
            lr,
            stop_reason: None,
        }
    }
}

pub struct TrainingOutcome<M> {
    pub model: M,
    pub state: TrainingState,
    pub checkpoint_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Criterion over the normalized predictions of the whole split.
    pub loss: f64,
    pub metrics: Metrics,
}

/// One configured training run over a graph and a data provider.
pub struct Experiment<P> {
    config: ExperimentConfig,
    graph: GraphData,
    provider: P,
    context: ExperimentContext,
    scaler: StandardScaler,
    reshaper: DataReshaper,
    loss: LossAssembler,
    evaluator: MetricEvaluator,
}

impl<P: DataProvider> Experiment<P> {
    pub fn new(config: ExperimentConfig, graph: GraphData, provider: P) -> Result<Self> {
        let context = ExperimentContext::new(&config.model_name, &config.log)?;
        Self::with_context(config, graph, provider, context)
    }

    pub fn with_context(
        config: ExperimentConfig,
        graph: GraphData,
        provider: P,
        context: ExperimentContext,
    ) -> Result<Self> {
        config.validate()?;
        graph.validate()?;

        let num_nodes = graph.num_nodes();
        if provider.num_nodes() != num_nodes {
            return Err(HarnessError::shape("data provider nodes", num_nodes, provider.num_nodes()));
        }
        let num_features = provider.num_features();
        if config.model.input_dim > num_features || config.model.output_dim > num_features {
            return Err(HarnessError::shape(
                "model dimensions",
                format!(
                    "input_dim {} and output_dim {} <= raw features",
                    config.model.input_dim, config.model.output_dim
                ),
                num_features,
            ));
        }
        if config.data.embed {
            if let Some(index) = config.data.aux_features.iter().find(|i| **i > num_features) {
                return Err(HarnessError::shape(
                    "auxiliary embedding index",
                    format!("<= {num_features}"),
                    index,
                ));
            }
        }

        let scaler = provider.scaler(Split::Val).clone();
        if scaler.num_features() < config.model.output_dim {
            return Err(HarnessError::shape("scaler features", config.model.output_dim, scaler.num_features()));
        }

        let output_dim = config.model.output_dim;
        let null_value = config.data.null_value;
        let reshaper = DataReshaper::new(&config, num_nodes);
        let loss = LossAssembler::new(&config.loss, scaler.clone(), output_dim, null_value);
        let evaluator = MetricEvaluator::new(scaler.clone(), output_dim, null_value);

        if config.loss.strategy == LossStrategy::Composite && !loss.has_terms() {
            warn!("No loss terms enabled; the training loss is identically zero");
        }

        info!(
            "Experiment {} - nodes: {}, edges: {}, features: {}",
            config.model_name,
            num_nodes,
            graph.num_edges(),
            num_features
        );

        Ok(Self {
            config,
            graph,
            provider,
            context,
            scaler,
            reshaper,
            loss,
            evaluator,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.context.log_dir()
    }

    pub fn model_context(&self) -> ModelContext<'_> {
        ModelContext {
            config: &self.config,
            graph: &self.graph,
            scaler: &self.scaler,
            num_nodes: self.graph.num_nodes(),
            input_width: self.config.input_width(),
            output_dim: self.config.model.output_dim,
            aux_width: if self.config.data.embed {
                self.config.data.aux_features.len()
            } else {
                0
            },
        }
    }

    pub fn train<B, M>(&mut self, model: M, device: &B::Device) -> Result<TrainingOutcome<M>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ForecastModel<B>,
        M::InnerModule: ForecastModel<B::InnerBackend>,
    {
        let epochs = self.config.train.epochs;
        let log_every = self.config.train.log_every;

        info!("Model mode: train");
        info!("Total trainable parameters {}", model.num_params());
        if self.config.device.use_multi_gpu {
            warn!(
                "Multi-device training requested for devices {:?}; running on a single device",
                self.config.device.device_ids
            );
        }

        let train_loader = self.provider.loader::<B>(Split::Train, device);
        let train_steps = self.provider.num_batches(Split::Train);

        let checkpoint_dir = Path::new(&self.config.checkpoints)
            .join(&self.config.model_name)
            .join(model.setting());
        fs::create_dir_all(&checkpoint_dir)?;
        self.config.save(checkpoint_dir.join(CONFIG_FILE))?;

        let mut optimizer = AdamConfig::new().with_epsilon(1e-8).init::<B, M>();
        let mut scheduler = LrScheduler::from_config(
            &self.config.train.scheduler,
            self.config.train.lr,
            epochs,
            train_steps,
        )?;
        let mut early_stopping =
            EarlyStopping::new(self.config.train.patience).with_delta(self.config.train.delta);
        let mut state = TrainingState::new(scheduler.lr());
        let mut model = model;

        info!("Start training ...");
        info!("num_batches: {}", train_steps);

        let mut report_time = Instant::now();
        let mut iters_since_report = 0usize;

        for epoch in 1..=epochs {
            debug!("Train epoch {}", epoch);
            let mut losses = Vec::with_capacity(train_steps);

            for (i, batch) in train_loader.iter().enumerate() {
                let reshaped = self.reshaper.reshape(batch)?;
                let first_channel = self.reshaper.first_input_channel(reshaped.inputs.clone());

                let output = model.forward(reshaped.inputs, reshaped.aux);
                let loss = self.loss.forward(first_channel, reshaped.targets, &output)?;
                let loss_value = loss.clone().into_scalar().elem::<f64>();

                let fe = &output.diagnostics;
                debug!(
                    "FE: number - {}, time - {:.3} s, err - {:.3}, loss - {:.6}",
                    fe.evaluations,
                    fe.elapsed.as_secs_f64(),
                    fe.error,
                    loss_value
                );
                losses.push(loss_value);

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(scheduler.lr(), model, grads);
                scheduler.on_batch_end();

                self.context
                    .add_scalar("train/loss", loss_value, epoch * train_steps + i)?;
                iters_since_report += 1;
            }

            let report =
                self.run_evaluation::<B::InnerBackend, _>(&model.valid(), Split::Val, epoch, device)?;
            let train_loss = if losses.is_empty() {
                0.0
            } else {
                losses.iter().sum::<f64>() / losses.len() as f64
            };

            state.epoch = epoch;
            state.train_losses.push(train_loss);
            state.val_loss = Some(report.loss);

            if epoch % log_every == 0 {
                let speed = report_time.elapsed().as_secs_f64() / iters_since_report.max(1) as f64;
                let left_time = speed * ((epochs - epoch) * train_steps) as f64;
                info!(
                    "Epoch [{}/{}] train_loss: {:.4}, val_loss: {:.4}, lr: {:.6}",
                    epoch,
                    epochs,
                    train_loss,
                    report.loss,
                    scheduler.lr()
                );
                info!("speed: {:.4}s/iter; left time: {:.4}s", speed, left_time);
                iters_since_report = 0;
                report_time = Instant::now();
            }

            scheduler.on_epoch_end(report.loss);
            state.lr = scheduler.lr();
            state.scheduler_steps = scheduler.step_count();

            let decision = early_stopping.check(report.loss);
            state.best_val_loss = early_stopping.best();
            state.early_stop_counter = early_stopping.counter();

            match decision {
                EarlyStopDecision::Improved { previous } => {
                    info!(
                        "Validation loss decreased ({:.6} --> {:.6}). Saving model ...",
                        previous, report.loss
                    );
                    save_checkpoint(&model, &checkpoint_dir)?;
                }
                EarlyStopDecision::NoImprovement { .. } => {}
                EarlyStopDecision::Stop => {
                    info!("Early stopping");
                    state.stop_reason = Some(StopReason::EarlyStopped);
                    break;
                }
            }

            info!("{}", "---".repeat(30));
        }

        state.stop_reason.get_or_insert(StopReason::Completed);
        self.context.flush()?;

        Ok(TrainingOutcome {
            model,
            state,
            checkpoint_dir,
        })
    }

    /// Full pass over `split` without gradients.
    pub fn evaluate<B, M>(&mut self, model: &M, split: Split, device: &B::Device) -> Result<EvalReport>
    where
        B: Backend,
        M: ForecastModel<B>,
    {
        self.run_evaluation(model, split, 0, device)
    }

    fn run_evaluation<B, M>(
        &mut self,
        model: &M,
        split: Split,
        epoch: usize,
        device: &B::Device,
    ) -> Result<EvalReport>
    where
        B: Backend,
        M: ForecastModel<B>,
    {
        let loader = self.provider.loader::<B>(split, device);
        let steps = self.provider.num_batches(split);
        let tag = format!("{split}/loss");

        let mut truths = Vec::with_capacity(steps);
        let mut preds = Vec::with_capacity(steps);

        for (i, batch) in loader.iter().enumerate() {
            let reshaped = self.reshaper.reshape(batch)?;
            let first_channel = self.reshaper.first_input_channel(reshaped.inputs.clone());

            let output = model.forward(reshaped.inputs, reshaped.aux);
            let loss = self
                .loss
                .forward(first_channel, reshaped.targets.clone(), &output)?;
            self.context
                .add_scalar(&tag, loss.into_scalar().elem::<f64>(), epoch * steps + i)?;

            truths.push(reshaped.targets); // [H, B, N * W_out]
            preds.push(output.prediction);
        }

        if truths.is_empty() {
            return Err(HarnessError::Data(format!("{split} split yields no batches")));
        }

        let truths = Tensor::cat(truths, 1);
        let preds = Tensor::cat(preds, 1);
        let loss = self
            .loss
            .criterion()
            .forward(truths.clone(), preds.clone())
            .into_scalar()
            .elem::<f64>();

        let metrics = self.evaluator.evaluate(truths, preds)?;
        info!(
            "Evaluation: - mae - {:.4} - smape - {:.4} - rmse - {:.4}",
            metrics.mae, metrics.smape, metrics.rmse
        );

        Ok(EvalReport { loss, metrics })
    }
}

fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, dir: &Path) -> Result<()> {
    model
        .clone()
        .save_file(dir.join(CHECKPOINT_FILE), &CompactRecorder::new())
        .map_err(|err| HarnessError::Checkpoint(format!("{err:?}")))
}
