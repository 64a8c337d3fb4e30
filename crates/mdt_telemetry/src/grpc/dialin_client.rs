use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status, Streaming};
use tracing::{debug, info, warn};

use crate::domain::{handle_telemetry, Accumulator, MdtConfig, MdtError, MdtResult, GRPC_ENCODE_GPBKV};
use crate::proto::ems::g_rpc_config_oper_client::GRpcConfigOperClient;
use crate::proto::ems::{CreateSubsArgs, CreateSubsReply};

/// Request id sent with every subscription.
const SUBSCRIPTION_REQ_ID: i64 = 1;

pub type ConfigOperClient = GRpcConfigOperClient<InterceptedService<Channel, CredentialsInterceptor>>;

/// Attaches the configured `username` and `password` metadata to every call.
#[derive(Clone)]
pub struct CredentialsInterceptor {
    username: MetadataValue<Ascii>,
    password: MetadataValue<Ascii>,
}

impl CredentialsInterceptor {
    pub fn new(username: &str, password: &str) -> MdtResult<Self> {
        let username = username
            .parse()
            .map_err(|_| MdtError::InvalidCredentials("username is not valid metadata".to_string()))?;
        let password = password
            .parse()
            .map_err(|_| MdtError::InvalidCredentials("password is not valid metadata".to_string()))?;

        Ok(Self { username, password })
    }
}

impl Interceptor for CredentialsInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        metadata.insert("username", self.username.clone());
        metadata.insert("password", self.password.clone());
        Ok(request)
    }
}

/// Where the dialin client is in its subscribe/receive/redial cycle.
pub enum DialinState {
    /// Build a client handle on the shared channel.
    Connecting,
    /// Issue `CreateSubs` on the device.
    Subscribing(Box<ConfigOperClient>),
    /// Read replies from an accepted subscription.
    Streaming(Box<Streaming<CreateSubsReply>>),
    /// Wait out the redial interval.
    Backoff,
    /// Terminal.
    Stopped,
}

impl DialinState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Subscribing(_) => "subscribing",
            Self::Streaming(_) => "streaming",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

/// Subscribes on a device and reads its telemetry stream, re-subscribing
/// after failures until cancelled or redial is disabled.
pub struct DialinClient {
    channel: Channel,
    credentials: CredentialsInterceptor,
    subscription: String,
    redial: Option<Duration>,
    max_msg_size: Option<usize>,
    accumulator: Arc<dyn Accumulator>,
}

impl DialinClient {
    /// Create the outbound channel. Nothing is dialled until the first
    /// subscription, so an unreachable device is not an error here.
    pub fn new(
        config: &MdtConfig,
        tls: Option<ClientTlsConfig>,
        accumulator: Arc<dyn Accumulator>,
    ) -> MdtResult<Self> {
        let uri = config.dial_uri();
        let mut endpoint =
            Endpoint::from_shared(uri.clone()).map_err(|e| MdtError::InvalidAddress {
                address: uri,
                reason: e.to_string(),
            })?;

        if let Some(tls) = tls {
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| MdtError::Tls(e.to_string()))?;
        }

        Ok(Self {
            channel: endpoint.connect_lazy(),
            credentials: CredentialsInterceptor::new(&config.username, &config.password)?,
            subscription: config.subscription.clone(),
            redial: config.redial_interval(),
            max_msg_size: config.grpc_max_msg_size(),
            accumulator,
        })
    }

    /// Drive the state machine until it reaches [`DialinState::Stopped`].
    pub async fn run(self, shutdown: CancellationToken) {
        info!(subscription = %self.subscription, "gRPC dialin client started");

        let mut state = DialinState::Connecting;
        loop {
            state = self.step(state, &shutdown).await;
            if matches!(state, DialinState::Stopped) {
                break;
            }
        }

        info!(subscription = %self.subscription, "gRPC dialin client stopped");
    }

    /// Perform the work of `state` and return the next one.
    pub async fn step(&self, state: DialinState, shutdown: &CancellationToken) -> DialinState {
        if shutdown.is_cancelled() {
            return DialinState::Stopped;
        }

        match state {
            DialinState::Connecting => DialinState::Subscribing(Box::new(self.client())),
            DialinState::Subscribing(client) => self.subscribe(*client, shutdown).await,
            DialinState::Streaming(stream) => self.receive(stream, shutdown).await,
            DialinState::Backoff => self.backoff(shutdown).await,
            DialinState::Stopped => DialinState::Stopped,
        }
    }

    fn client(&self) -> ConfigOperClient {
        let client =
            GRpcConfigOperClient::with_interceptor(self.channel.clone(), self.credentials.clone());
        match self.max_msg_size {
            Some(limit) => client.max_decoding_message_size(limit),
            None => client,
        }
    }

    async fn subscribe(
        &self,
        mut client: ConfigOperClient,
        shutdown: &CancellationToken,
    ) -> DialinState {
        let request = CreateSubsArgs {
            req_id: SUBSCRIPTION_REQ_ID,
            encode: GRPC_ENCODE_GPBKV,
            subidstr: self.subscription.clone(),
        };

        let reply = tokio::select! {
            _ = shutdown.cancelled() => return DialinState::Stopped,
            reply = client.create_subs(request) => reply,
        };

        match reply {
            Ok(response) => {
                debug!(subscription = %self.subscription, "gRPC dialin subscription established");
                DialinState::Streaming(Box::new(response.into_inner()))
            }
            Err(status) => {
                if shutdown.is_cancelled() {
                    return DialinState::Stopped;
                }
                warn!(error = %status, "gRPC dialin subscription failed");
                self.accumulator.add_error(MdtError::DialinSubscribe(status));
                DialinState::Backoff
            }
        }
    }

    async fn receive(
        &self,
        mut stream: Box<Streaming<CreateSubsReply>>,
        shutdown: &CancellationToken,
    ) -> DialinState {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return DialinState::Stopped,
            message = stream.message() => message,
        };

        match message {
            Ok(Some(reply)) => {
                if !reply.errors.is_empty() {
                    warn!(errors = ?reply.errors, "gRPC dialin device reported errors");
                    self.accumulator.add_error(MdtError::DialinRemote(reply.errors));
                } else {
                    handle_telemetry(&reply.data, self.accumulator.as_ref());
                }
                DialinState::Streaming(stream)
            }
            Ok(None) => {
                debug!("gRPC dialin stream ended");
                DialinState::Backoff
            }
            Err(status) => {
                if shutdown.is_cancelled() {
                    return DialinState::Stopped;
                }
                self.accumulator.add_error(MdtError::DialinReceive(status));
                DialinState::Backoff
            }
        }
    }

    async fn backoff(&self, shutdown: &CancellationToken) -> DialinState {
        let Some(delay) = self.redial else {
            info!("gRPC dialin redial disabled");
            return DialinState::Stopped;
        };

        debug!(delay_ms = delay.as_millis() as u64, "redialing gRPC dialin subscription");
        tokio::select! {
            _ = shutdown.cancelled() => DialinState::Stopped,
            _ = tokio::time::sleep(delay) => DialinState::Connecting,
        }
    }
}
