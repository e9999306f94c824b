use burn::tensor::{backend::Backend, Tensor};

/// Mean of `x` over the entries where `valid` is non-zero. Masked entries
/// contribute to neither the sum nor the count.
pub fn masked_average<B: Backend, const D: usize>(x: Tensor<B, D>, valid: Tensor<B, D>) -> Tensor<B, 1> {
    let zeros = x.zeros_like();
    let mask = valid.clone().equal_elem(0.0).bool_not();

    let masked = zeros.mask_where(mask, x);
    let count = valid.sum().clamp_min(1.0);

    masked.sum() / count
}

/// Distance from the null sentinel under which a denormalized reading is
/// still treated as missing; absorbs the scale/unscale round-off.
pub const NULL_TOLERANCE: f32 = 1e-4;

/// 1.0 where `truth` holds a real reading, 0.0 where it lies within
/// `NULL_TOLERANCE` of `null_value`.
pub fn valid_mask<B: Backend, const D: usize>(truth: Tensor<B, D>, null_value: f32) -> Tensor<B, D> {
    (truth - null_value).abs().greater_elem(NULL_TOLERANCE).float()
}

pub fn mean_absolute_error<B: Backend, const D: usize>(
    y_true: Tensor<B, D>,
    y_pred: Tensor<B, D>,
) -> Tensor<B, 1> {
    (y_pred - y_true).abs().mean()
}

pub fn mean_squared_error<B: Backend, const D: usize>(
    y_true: Tensor<B, D>,
    y_pred: Tensor<B, D>,
) -> Tensor<B, 1> {
    let residual = y_pred - y_true;
    (residual.clone() * residual).mean()
}
