mod accumulator;
mod decoder;
mod error;
mod measurement;
mod mdt_config;
mod tls;

pub use accumulator::*;
pub use decoder::*;
pub use error::*;
pub use measurement::*;
pub use mdt_config::*;
pub use tls::*;
