use std::time::Duration;

use burn::tensor::{backend::Backend, Tensor};

/// Solver statistics reported by a forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Diagnostics {
    pub evaluations: usize,
    pub elapsed: Duration,
    pub error: f64,
}

/// Latent state exposed by variational models.
#[derive(Debug, Clone)]
pub struct VariationalState<B: Backend> {
    pub mean: Tensor<B, 4>,           // [traj, B, N, latent]
    pub log_var: Tensor<B, 4>,        // [traj, B, N, latent]
    pub reconstruction: Tensor<B, 3>, // [T, B, N]
    pub contrastive: Option<Tensor<B, 1>>,
}

#[derive(Debug, Clone)]
pub struct ForecastOutput<B: Backend> {
    pub prediction: Tensor<B, 3>, // [H, B, N * W_out]
    pub diagnostics: Diagnostics,
    pub variational: Option<VariationalState<B>>,
}

impl<B: Backend> ForecastOutput<B> {
    pub fn new(prediction: Tensor<B, 3>) -> Self {
        Self {
            prediction,
            diagnostics: Diagnostics::default(),
            variational: None,
        }
    }

    pub fn with_variational(mut self, state: VariationalState<B>) -> Self {
        self.variational = Some(state);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Forward capability every trainable forecaster provides.
pub trait ForecastModel<B: Backend> {
    /// `input` is `[T, B, N * W_in]`, `aux` the optional `[H, B, N * k]`
    /// exogenous conditioning extracted from the targets.
    fn forward(&self, input: Tensor<B, 3>, aux: Option<Tensor<B, 3>>) -> ForecastOutput<B>;

    /// Name of the run setting, used for the checkpoint subdirectory.
    fn setting(&self) -> String;
}
