use thiserror::Error;

pub type MdtResult<T> = Result<T, MdtError>;

/// Every failure the ingestion core can produce.
///
/// Startup variants are returned from [`crate::MdtTelemetry::start`]; everything
/// else is reported through [`crate::domain::Accumulator::add_error`] and only
/// ends the connection, stream or packet it occurred on.
#[derive(Error, Debug)]
pub enum MdtError {
    // Startup
    #[error("invalid Cisco MDT transport: {0}")]
    InvalidTransport(String),

    #[error("invalid service address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial Cisco MDT: {0}")]
    Dial(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("invalid dialin credentials: {0}")]
    InvalidCredentials(String),

    // TCP dialout
    #[error("failed to accept TCP connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("unable to read dialout header: {0}")]
    HeaderRead(#[source] std::io::Error),

    #[error("dialout packet too long: {len} (max {max})")]
    PayloadTooLong { len: u32, max: u32 },

    #[error("invalid dialout flags: {0}")]
    InvalidFlags(u16),

    #[error("TCP dialout I/O error: {0}")]
    PayloadRead(#[source] std::io::Error),

    #[error("TCP dialout premature EOF")]
    PrematureEof,

    // Decoding
    #[error("Cisco MDT failed to decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Cisco MDT invalid field: encoding path or measurement empty")]
    EmptyMeasurement,

    // gRPC dialout
    #[error("GRPC dialout receive error: {0}")]
    DialoutReceive(#[source] tonic::Status),

    #[error("GRPC dialout error: {0:?}")]
    DialoutRemote(Vec<String>),

    #[error("GRPC dialout server error: {0}")]
    Serve(#[source] tonic::transport::Error),

    // gRPC dialin
    #[error("GRPC dialin subscription failed: {0}")]
    DialinSubscribe(#[source] tonic::Status),

    #[error("GRPC dialin subscription receive error: {0}")]
    DialinReceive(#[source] tonic::Status),

    #[error("GRPC dialin error: {0:?}")]
    DialinRemote(Vec<String>),
}
