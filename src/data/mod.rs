pub mod batchitem;
pub mod provider;
pub mod scaler;
pub mod window;

pub use batchitem::Batch;
pub use provider::{DataProvider, SeriesProvider, Split};
pub use scaler::StandardScaler;
