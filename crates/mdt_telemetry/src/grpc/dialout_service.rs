use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, instrument};

use crate::domain::{handle_telemetry, Accumulator, MdtError};
use crate::proto::mdt_dialout::g_rpc_mdt_dialout_server::GRpcMdtDialout;
use crate::proto::mdt_dialout::MdtDialoutArgs;

/// Receiving side of the `MdtDialout` RPC.
///
/// Devices push packets and never get anything back; the response stream is
/// empty and is only returned once the inbound stream is finished.
pub struct MdtDialoutService {
    accumulator: Arc<dyn Accumulator>,
    shutdown: CancellationToken,
}

impl MdtDialoutService {
    pub fn new(accumulator: Arc<dyn Accumulator>, shutdown: CancellationToken) -> Self {
        Self {
            accumulator,
            shutdown,
        }
    }

    /// Decode packets in arrival order until the stream ends, fails, sends
    /// an error-only packet or shutdown is requested.
    pub async fn consume<S>(&self, mut stream: S)
    where
        S: Stream<Item = Result<MdtDialoutArgs, Status>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            let packet = match next {
                Some(Ok(packet)) => packet,
                Some(Err(status)) => {
                    if !self.shutdown.is_cancelled() {
                        self.accumulator.add_error(MdtError::DialoutReceive(status));
                    }
                    break;
                }
                None => break,
            };

            if packet.data.is_empty() && !packet.errors.is_empty() {
                self.accumulator
                    .add_error(MdtError::DialoutRemote(packet.errors));
                break;
            }

            handle_telemetry(&packet.data, self.accumulator.as_ref());
        }
    }
}

#[tonic::async_trait]
impl GRpcMdtDialout for MdtDialoutService {
    type MdtDialoutStream = tokio_stream::Empty<Result<MdtDialoutArgs, Status>>;

    #[instrument(skip_all, fields(peer = tracing::field::Empty))]
    async fn mdt_dialout(
        &self,
        request: Request<Streaming<MdtDialoutArgs>>,
    ) -> Result<Response<Self::MdtDialoutStream>, Status> {
        if let Some(peer) = request.remote_addr() {
            tracing::Span::current().record("peer", tracing::field::display(peer));
        }

        debug!("accepted gRPC dialout stream");
        self.consume(request.into_inner()).await;
        debug!("closed gRPC dialout stream");

        Ok(Response::new(tokio_stream::empty()))
    }
}
