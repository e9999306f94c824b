use std::time::Instant;

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use crate::model::{Diagnostics, ForecastModel, ForecastOutput, VariationalState};

/// Per-node variational encoder with prediction and reconstruction heads.
///
/// Weights are shared across nodes: each node's input window is encoded to a
/// Gaussian latent whose mean drives both decoders.
#[derive(Module, Debug)]
pub struct LatentForecaster<B: Backend> {
    num_nodes: usize,
    seq_len: usize,
    horizon: usize,
    input_width: usize,
    output_dim: usize,
    latent_dim: usize,
    encoder: Linear<B>,
    mean_head: Linear<B>,
    log_var_head: Linear<B>,
    pred_head: Linear<B>,
    recon_head: Linear<B>,
}

impl<B: Backend> LatentForecaster<B> {
    fn encode(&self, input: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [seq_len, batch_size, _] = input.dims();
        let n = self.num_nodes;

        // [T, B, N * W] -> [B, N, T * W]
        let x = input
            .swap_dims(0, 1)
            .reshape([batch_size, seq_len, n, self.input_width])
            .swap_dims(1, 2)
            .reshape([batch_size, n, seq_len * self.input_width]);

        let hidden = self.encoder.forward(x).tanh();
        let mean = self.mean_head.forward(hidden.clone());
        // bounded so exp() cannot overflow in the KL term
        let log_var = self.log_var_head.forward(hidden).clamp_min(-10.0).clamp_max(10.0);

        (mean, log_var)
    }
}

impl<B: Backend> ForecastModel<B> for LatentForecaster<B> {
    fn forward(&self, input: Tensor<B, 3>, _aux: Option<Tensor<B, 3>>) -> ForecastOutput<B> {
        let start = Instant::now();
        let [_, batch_size, _] = input.dims();
        let n = self.num_nodes;

        let (mean, log_var) = self.encode(input);

        let prediction = self
            .pred_head
            .forward(mean.clone())
            .reshape([batch_size, n, self.horizon, self.output_dim])
            .swap_dims(1, 2)
            .reshape([batch_size, self.horizon, n * self.output_dim])
            .swap_dims(0, 1);

        let reconstruction = self
            .recon_head
            .forward(mean.clone())
            .swap_dims(1, 2)
            .swap_dims(0, 1);

        let state = VariationalState {
            mean: mean.unsqueeze(),
            log_var: log_var.unsqueeze(),
            reconstruction,
            contrastive: None,
        };
        let diagnostics = Diagnostics {
            evaluations: 1,
            elapsed: start.elapsed(),
            error: 0.0,
        };

        ForecastOutput::new(prediction)
            .with_variational(state)
            .with_diagnostics(diagnostics)
    }

    fn setting(&self) -> String {
        format!(
            "latent_seq{}_hor{}_z{}",
            self.seq_len, self.horizon, self.latent_dim
        )
    }
}

#[derive(Config, Debug)]
pub struct LatentForecasterConfig {
    num_nodes: usize,
    seq_len: usize,
    horizon: usize,
    input_width: usize,
    output_dim: usize,

    #[config(default = 64)]
    d_hidden: usize,

    #[config(default = 16)]
    latent_dim: usize,
}

impl LatentForecasterConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LatentForecaster<B> {
        let encoder = LinearConfig::new(self.seq_len * self.input_width, self.d_hidden).init();
        let mean_head = LinearConfig::new(self.d_hidden, self.latent_dim).init();
        let log_var_head = LinearConfig::new(self.d_hidden, self.latent_dim).init();
        let pred_head = LinearConfig::new(self.latent_dim, self.horizon * self.output_dim).init();
        let recon_head = LinearConfig::new(self.latent_dim, self.seq_len).init();

        LatentForecaster {
            num_nodes: self.num_nodes,
            seq_len: self.seq_len,
            horizon: self.horizon,
            input_width: self.input_width,
            output_dim: self.output_dim,
            latent_dim: self.latent_dim,
            encoder,
            mean_head,
            log_var_head,
            pred_head,
            recon_head,
        }
        .to_device(device)
    }
}
