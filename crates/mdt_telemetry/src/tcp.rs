mod header;
mod listener;
mod server;

pub use header::*;
pub use listener::*;
pub use server::*;
