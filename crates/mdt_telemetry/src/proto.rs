//! Protobuf messages and gRPC stubs for the MDT transports.
//!
//! The sources live in `proto/` at the crate root. The Rust files below are
//! checked in as produced by `tonic-build` so the crate builds without `protoc`.
//! Regenerate them with `MDT_REGENERATE_PROTOS=1 cargo build` (see `build.rs`).

/// GPB key/value telemetry envelope.
#[allow(clippy::all)]
pub mod telemetry;

/// gRPC dialout service (device pushes to collector).
#[allow(clippy::all)]
pub mod mdt_dialout;

/// gRPC dialin service (collector subscribes on the device).
#[allow(clippy::all)]
pub mod ems;
