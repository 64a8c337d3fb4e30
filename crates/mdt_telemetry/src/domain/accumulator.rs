use crate::domain::{MdtError, Measurement};

/// Sink for decoded measurements and non-fatal errors.
///
/// Implementations must not block: the transports call into the accumulator
/// inline, between reading one packet and the next. A failing sink must
/// swallow its own failures; nothing here is propagated back to the transport.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Accumulator: Send + Sync {
    /// Record one flattened measurement.
    fn add_measurement(&self, measurement: Measurement);

    /// Report a failure that did not stop the service.
    fn add_error(&self, error: MdtError);
}
