use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use tracing::{info, warn};

use airtrain::data::{DataProvider, SeriesProvider, Split};
use airtrain::graph::load_graph_data;
use airtrain::model::ForecastModel;
use airtrain::models::{LatentForecasterConfig, LinearForecasterConfig};
use airtrain::{Experiment, ExperimentConfig, HarnessError, ModelContext, Result};

type InnerBackend = NdArray<f32>;
type TrainBackend = Autodiff<InnerBackend>;

fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: airtrain <config.json>");
        std::process::exit(2);
    };

    if let Err(err) = run(&path) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(path: &str) -> Result<()> {
    let config = ExperimentConfig::from_file(path)?;
    let device = NdArrayDevice::default();

    let graph = load_graph_data(&config.data.root_path)?;
    let provider = SeriesProvider::from_file(&config.data.root_path, &config)?;
    let model_name = config.model_name.clone();

    let mut experiment = Experiment::new(config, graph, provider)?;
    if experiment.config().device.use_gpu {
        warn!("GPU requested; this binary runs on the ndarray CPU backend");
    }

    match model_name.as_str() {
        "Linear" => {
            let model = linear(&experiment.model_context(), &device);
            fit(&mut experiment, model, &device)
        }
        "Latent" => {
            let model = latent(&experiment.model_context(), &device);
            fit(&mut experiment, model, &device)
        }
        other => Err(HarnessError::Config(format!(
            "unknown model {other:?}, expected one of Linear, Latent"
        ))),
    }
}

fn linear(
    ctx: &ModelContext<'_>,
    device: &NdArrayDevice,
) -> airtrain::models::LinearForecaster<TrainBackend> {
    let model = &ctx.config.model;
    LinearForecasterConfig::new(
        ctx.num_nodes,
        model.seq_len,
        model.horizon,
        ctx.input_width,
        ctx.output_dim,
    )
    .with_aux_width(ctx.aux_width)
    .init(device)
}

fn latent(
    ctx: &ModelContext<'_>,
    device: &NdArrayDevice,
) -> airtrain::models::LatentForecaster<TrainBackend> {
    let model = &ctx.config.model;
    if ctx.aux_width > 0 {
        warn!("Latent ignores the auxiliary embedding");
    }
    LatentForecasterConfig::new(
        ctx.num_nodes,
        model.seq_len,
        model.horizon,
        ctx.input_width,
        ctx.output_dim,
    )
    .with_d_hidden(model.hidden_dim)
    .with_latent_dim(model.latent_dim)
    .init(device)
}

fn fit<M>(
    experiment: &mut Experiment<SeriesProvider>,
    model: M,
    device: &NdArrayDevice,
) -> Result<()>
where
    M: AutodiffModule<TrainBackend> + ForecastModel<TrainBackend>,
    M::InnerModule: ForecastModel<InnerBackend>,
{
    let outcome = experiment.train::<TrainBackend, M>(model, device)?;
    info!(
        "Finished after {} epochs ({:?}), best val loss {:.6}",
        outcome.state.epoch,
        outcome.state.stop_reason,
        outcome.state.best_val_loss.unwrap_or(f64::NAN)
    );
    info!("Checkpoints in {}", outcome.checkpoint_dir.display());

    if experiment.provider().num_samples(Split::Test) == 0 {
        warn!("Test split is empty, skipping evaluation");
        return Ok(());
    }

    info!("Model mode: test");
    let report = experiment.evaluate::<InnerBackend, _>(&outcome.model.valid(), Split::Test, device)?;
    info!("Test loss: {:.6}", report.loss);

    Ok(())
}
