//! Destination transaction support: sequence allocation and gas pricing

mod gas;
mod nonce;

pub use gas::{GasEstimator, GasPrice};
pub use nonce::Sequencer;
