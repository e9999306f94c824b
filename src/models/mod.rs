pub mod latent;
pub mod linear;

pub use latent::{LatentForecaster, LatentForecasterConfig};
pub use linear::{LinearForecaster, LinearForecasterConfig};
