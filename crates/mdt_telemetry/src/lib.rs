//! Model-driven telemetry ingestion.
//!
//! Accepts GPB key/value encoded telemetry over one of three transports and
//! hands the flattened measurements to an [`domain::Accumulator`]:
//!
//! - `tcp-dialout`: devices push length-prefixed frames over plain TCP
//! - `grpc-dialout`: devices push over a bidirectional gRPC stream
//! - `grpc-dialin`: the collector subscribes on the device and reads a gRPC stream
//!
//! [`mdt_telemetry::MdtTelemetry`] starts exactly one of them and tears it down.

pub mod domain;
pub mod grpc;
pub mod mdt_telemetry;
pub mod proto;
pub mod tcp;

pub use mdt_telemetry::*;
