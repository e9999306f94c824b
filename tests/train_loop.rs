use std::fs;

use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};
use tempfile::TempDir;

use airtrain::config::{DataConfig, LogConfig, LossStrategy, LrPolicyKind, ModelConfig};
use airtrain::context::ExperimentContext;
use airtrain::data::{SeriesProvider, Split};
use airtrain::graph::GraphData;
use airtrain::model::{ForecastModel, ForecastOutput};
use airtrain::models::{LatentForecasterConfig, LinearForecasterConfig};
use airtrain::{Experiment, ExperimentConfig, HarnessError, StopReason};

type InnerBackend = NdArray<f32>;
type TestBackend = Autodiff<InnerBackend>;

fn graph(num_nodes: usize) -> GraphData {
    GraphData {
        adj_mx: vec![vec![1.0; num_nodes]; num_nodes],
        edge_index: [vec![0], vec![num_nodes - 1]],
        edge_attr: vec![],
        node_attr: vec![],
    }
}

fn series(steps: usize, offset: usize) -> Vec<Vec<Vec<f32>>> {
    (offset..offset + steps)
        .map(|t| {
            let t = t as f32;
            vec![vec![1.0 + (t * 0.5).sin()], vec![2.0 + (t * 0.3).cos()]]
        })
        .collect()
}

fn config(model_name: &str, dir: &TempDir) -> ExperimentConfig {
    let mut config = ExperimentConfig::new(
        model_name.to_string(),
        DataConfig::new(dir.path().display().to_string()).with_batch_size(2),
        ModelConfig::new(1, 1, 3, 1).with_hidden_dim(8).with_latent_dim(4),
    )
    .with_checkpoints(dir.path().join("checkpoints").display().to_string())
    .with_log(LogConfig::new().with_to_stdout(false));
    config.train.epochs = 1;
    config
}

fn provider(config: &ExperimentConfig) -> SeriesProvider {
    // 11 train steps give 8 windows, i.e. 4 batches of 2
    SeriesProvider::from_splits(series(11, 0), series(5, 11), series(5, 16), config).unwrap()
}

fn experiment(config: ExperimentConfig) -> Experiment<SeriesProvider> {
    let provider = provider(&config);
    Experiment::with_context(config, graph(2), provider, ExperimentContext::silent()).unwrap()
}

fn logged_experiment(config: ExperimentConfig) -> Experiment<SeriesProvider> {
    let provider = provider(&config);
    Experiment::new(config, graph(2), provider).unwrap()
}

fn linear(experiment: &Experiment<SeriesProvider>) -> airtrain::models::LinearForecaster<TestBackend> {
    let ctx = experiment.model_context();
    LinearForecasterConfig::new(ctx.num_nodes, 3, 1, ctx.input_width, ctx.output_dim)
        .init(&Default::default())
}

/// Emits the same prediction for every input, so the validation loss never moves.
#[derive(Module, Debug)]
struct FrozenForecaster<B: Backend> {
    horizon: usize,
    proj: Linear<B>,
}

impl<B: Backend> ForecastModel<B> for FrozenForecaster<B> {
    fn forward(&self, input: Tensor<B, 3>, _aux: Option<Tensor<B, 3>>) -> ForecastOutput<B> {
        let [seq_len, batch_size, width] = input.dims();
        let x = input.swap_dims(0, 1).reshape([batch_size, seq_len * width]);

        // zero-weighted so the loss still reaches a parameter
        let y = self.proj.forward(x) * 0.0 + 0.5;
        let [_, out] = y.dims();

        ForecastOutput::new(
            y.reshape([batch_size, self.horizon, out / self.horizon])
                .swap_dims(0, 1),
        )
    }

    fn setting(&self) -> String {
        "frozen".to_string()
    }
}

fn frozen(experiment: &Experiment<SeriesProvider>) -> FrozenForecaster<TestBackend> {
    let ctx = experiment.model_context();
    FrozenForecaster {
        horizon: 1,
        proj: LinearConfig::new(3 * ctx.num_nodes * ctx.input_width, ctx.num_nodes * ctx.output_dim)
            .init(),
    }
}

#[test]
fn one_epoch_reports_finite_validation_loss() {
    let dir = tempfile::tempdir().unwrap();
    let mut experiment = experiment(config("Linear", &dir));
    let model = linear(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.epoch, 1);
    assert_eq!(state.train_losses.len(), 1);
    assert_eq!(state.stop_reason, Some(StopReason::Completed));
    let val_loss = state.val_loss.unwrap();
    assert!(val_loss.is_finite());
    assert!(val_loss >= 0.0);
    assert_eq!(state.best_val_loss, Some(val_loss));
    assert_eq!(state.early_stop_counter, 0);
}

#[test]
fn improvement_persists_checkpoint_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut experiment = experiment(config("Linear", &dir));
    let model = linear(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    let checkpoint_dir = &outcome.checkpoint_dir;
    assert!(checkpoint_dir.ends_with("Linear/linear_seq3_hor1"));
    assert!(checkpoint_dir.join("config.json").is_file());
    let has_checkpoint = fs::read_dir(checkpoint_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().starts_with("checkpoint"));
    assert!(has_checkpoint);

    let saved = ExperimentConfig::from_file(checkpoint_dir.join("config.json").to_str().unwrap()).unwrap();
    assert_eq!(saved.model_name, "Linear");
}

#[test]
fn one_cycle_steps_once_per_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Linear", &dir);
    config.train.scheduler.policy = LrPolicyKind::OneCycle;
    let mut experiment = experiment(config);
    let model = linear(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    assert_eq!(outcome.state.scheduler_steps, 4);
}

#[test]
fn multi_step_steps_once_per_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Linear", &dir);
    config.train.epochs = 2;
    config.train.scheduler.policy = LrPolicyKind::MultiStep;
    config.train.scheduler.steps = vec![1];
    let mut experiment = experiment(config);
    let model = linear(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    assert_eq!(outcome.state.epoch, 2);
    assert_eq!(outcome.state.scheduler_steps, 2);
    assert!((outcome.state.lr - 1e-4).abs() < 1e-12);
}

#[test]
fn composite_loss_trains_latent_model() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Latent", &dir);
    config.loss.strategy = LossStrategy::Composite;
    config.loss.kl_loss = true;
    config.loss.recon_loss = true;
    let mut experiment = experiment(config);

    let ctx = experiment.model_context();
    let model = LatentForecasterConfig::new(ctx.num_nodes, 3, 1, ctx.input_width, ctx.output_dim)
        .with_d_hidden(8)
        .with_latent_dim(4)
        .init::<TestBackend>(&Default::default());

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    assert!(outcome.state.train_losses[0].is_finite());
    assert!(outcome.state.train_losses[0] >= 0.0);
}

#[test]
fn composite_terms_require_latent_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Linear", &dir);
    config.loss.strategy = LossStrategy::Composite;
    config.loss.kl_loss = true;
    let mut experiment = experiment(config);
    let model = linear(&experiment);

    let result = experiment.train::<TestBackend, _>(model, &Default::default());

    assert!(matches!(result, Err(HarnessError::MissingCapability(_))));
}

#[test]
fn test_split_evaluation_reports_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let mut experiment = experiment(config("Linear", &dir));
    let model = linear(&experiment);
    let device = Default::default();

    let outcome = experiment.train::<TestBackend, _>(model, &device).unwrap();
    let report = experiment
        .evaluate::<InnerBackend, _>(&outcome.model.valid(), Split::Test, &device)
        .unwrap();

    assert!(report.loss.is_finite());
    assert!(report.metrics.mae >= 0.0);
    assert!(report.metrics.rmse >= report.metrics.mae - 1e-6);
    assert!(report.metrics.smape.is_finite());
}

#[test]
fn scalar_events_follow_batch_steps() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("run");
    let mut config = config("Linear", &dir);
    config.log = LogConfig::new()
        .with_to_stdout(false)
        .with_scalars(true)
        .with_log_dir(Some(log_dir.display().to_string()));
    let mut experiment = logged_experiment(config);
    let model = linear(&experiment);

    experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();
    drop(experiment);

    let contents = fs::read_to_string(log_dir.join("scalars.csv")).unwrap();
    let train_steps: Vec<&str> = contents
        .lines()
        .filter(|line| line.starts_with("train/loss,"))
        .map(|line| line.split(',').nth(1).unwrap())
        .collect();
    assert_eq!(train_steps, vec!["4", "5", "6", "7"]);
    assert_eq!(contents.lines().filter(|line| line.starts_with("val/loss,")).count(), 1);
}

#[test]
fn node_count_must_match_graph() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("Linear", &dir);
    let provider = provider(&config);

    let result = Experiment::with_context(config, graph(3), provider, ExperimentContext::silent());

    assert!(matches!(result, Err(HarnessError::Shape { .. })));
}

#[test]
fn flat_validation_loss_stops_after_patience() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Frozen", &dir);
    config.train.epochs = 10;
    config.train.patience = 2;
    let mut experiment = experiment(config);
    let model = frozen(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    let state = &outcome.state;
    assert_eq!(state.epoch, 3);
    assert_eq!(state.train_losses.len(), 3);
    assert_eq!(state.stop_reason, Some(StopReason::EarlyStopped));
    assert_eq!(state.early_stop_counter, 2);
    assert_eq!(state.best_val_loss, state.val_loss);
}

#[test]
fn improvement_margin_comes_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Linear", &dir);
    config.train.epochs = 5;
    config.train.patience = 1;
    config.train.delta = 1e9;
    let mut experiment = experiment(config);
    let model = linear(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    assert_eq!(outcome.state.epoch, 2);
    assert_eq!(outcome.state.stop_reason, Some(StopReason::EarlyStopped));
}

#[test]
fn plateau_steps_once_per_epoch_and_decays_on_flat_loss() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("Frozen", &dir);
    config.train.epochs = 3;
    config.train.scheduler.policy = LrPolicyKind::Plateau;
    config.train.scheduler.plateau_patience = 1;
    let mut experiment = experiment(config);
    let model = frozen(&experiment);

    let outcome = experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();

    assert_eq!(outcome.state.stop_reason, Some(StopReason::Completed));
    assert_eq!(outcome.state.scheduler_steps, 3);
    assert!((outcome.state.lr - 5e-4).abs() < 1e-12);
}

#[test]
fn epoch_summary_follows_log_every() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("run");
    let mut config = config("Frozen", &dir);
    config.train.epochs = 4;
    config.train.log_every = 2;
    config.log = LogConfig::new()
        .with_to_stdout(false)
        .with_to_log_file(true)
        .with_log_dir(Some(log_dir.display().to_string()));
    let mut experiment = logged_experiment(config);
    let model = frozen(&experiment);

    experiment
        .train::<TestBackend, _>(model, &Default::default())
        .unwrap();
    drop(experiment);

    let log = fs::read_to_string(log_dir.join("info.log")).unwrap();
    let summaries: Vec<&str> = log.lines().filter(|line| line.contains("Epoch [")).collect();
    assert_eq!(summaries.len(), 2);
    assert!(summaries[0].contains("Epoch [2/4]"));
    assert!(summaries[1].contains("Epoch [4/4]"));
}
