pub mod autobaseline;
pub mod distributions;
pub mod dwell;
pub mod em;
pub mod error;
pub mod gmm;
pub mod hmm;
pub mod hyperparameters;
pub mod io;
pub mod kmeans;
pub mod model;
pub mod opt;
pub mod progress;
pub mod task;
pub mod utils;
pub mod vb;

pub use autobaseline::{AutoBaseline, AutoBaselineConfig};
pub use error::HmmError;
pub use hyperparameters::HyperParameters;
pub use model::{Method, Model, ModelDocument};
pub use opt::{ConvergenceRecord, Initialization, TrainConfig};
