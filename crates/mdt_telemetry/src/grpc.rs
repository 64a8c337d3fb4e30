mod dialin_client;
mod dialout_server;
mod dialout_service;

pub use dialin_client::*;
pub use dialout_server::*;
pub use dialout_service::*;
