use burn::tensor::{backend::Backend, Tensor};

/// Raw batch as produced by the data provider, batch-major.
#[derive(Clone, Debug)]
pub struct Batch<B: Backend> {
    pub inputs: Tensor<B, 4>,  // [B, T, N, F]
    pub targets: Tensor<B, 4>, // [B, H, N, F]
}
