pub mod error;
pub mod predictor;

pub use error::{MlError, MlResult};
pub use predictor::PredictorClient;
