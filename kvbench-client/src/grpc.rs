//! The gRPC binding, speaking the store's native protobuf API.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};

use crate::client::{normalize_endpoint, with_timeout};
use crate::proto::auth_client::AuthClient;
use crate::proto::kv_client::KvClient;
use crate::proto::watch_client::WatchClient;
use crate::proto::{self, event::EventType, watch_request::RequestUnion};
use crate::{
    AuthToken, Authenticator, ClientOptions, Connect, Error, EventKind, Operation, Revision,
    StoreClient, WatchEvent, WatchStream,
};

/// The metadata key the store reads the auth token from.
pub const TOKEN_METADATA_KEY: &str = "token";

/// A [`StoreClient`] using the store's gRPC API.
///
/// Use [`Connect::connect`] to construct it. The underlying [`Channel`] multiplexes all
/// concurrent calls over one HTTP/2 connection.
#[derive(Debug)]
pub struct GrpcStore {
    kv: KvClient<Channel>,
    watch: WatchClient<Channel>,
    auth: AuthClient<Channel>,
    request_timeout: Duration,
    token: Option<AuthToken>,
}

impl GrpcStore {
    /// Wraps `message` into a request carrying the auth token, if any.
    fn request<T>(&self, operation: Operation, message: T) -> crate::Result<tonic::Request<T>> {
        let mut request = tonic::Request::new(message);
        if let Some(ref token) = self.token {
            let value = AsciiMetadataValue::try_from(token.as_str())
                .map_err(|err| Error::request(operation, err))?;
            request.metadata_mut().insert(TOKEN_METADATA_KEY, value);
        }
        Ok(request)
    }
}

fn status_error(operation: Operation, status: tonic::Status) -> Error {
    Error::status(operation, format!("{:?}", status.code()), status.message())
}

#[async_trait::async_trait]
impl Connect for GrpcStore {
    async fn connect(options: &ClientOptions) -> crate::Result<Self> {
        let connection_error = |cause: crate::BoxError| Error::Connection {
            endpoint: options.endpoint.clone(),
            cause,
        };

        let endpoint = Endpoint::from_shared(normalize_endpoint(&options.endpoint))
            .map_err(|err| connection_error(err.into()))?
            .connect_timeout(options.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|err| connection_error(err.into()))?;

        tracing::debug!(endpoint = %options.endpoint, "connected to gRPC endpoint");
        Ok(Self {
            kv: KvClient::new(channel.clone()),
            watch: WatchClient::new(channel.clone()),
            auth: AuthClient::new(channel),
            request_timeout: options.request_timeout,
            token: None,
        })
    }

    fn with_token(self, token: AuthToken) -> Self {
        Self {
            token: Some(token),
            ..self
        }
    }
}

#[async_trait::async_trait]
impl StoreClient for GrpcStore {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<Revision> {
        let message = proto::PutRequest {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
            ..Default::default()
        };

        with_timeout(Operation::Put, self.request_timeout, async {
            let request = self.request(Operation::Put, message)?;
            let response = self
                .kv
                .clone()
                .put(request)
                .await
                .map_err(|status| status_error(Operation::Put, status))?
                .into_inner();

            Ok(Revision(response.header.map_or(0, |h| h.revision)))
        })
        .await
    }

    async fn get(&self, key: &[u8]) -> crate::Result<Option<Bytes>> {
        let message = proto::RangeRequest {
            key: Bytes::copy_from_slice(key),
            ..Default::default()
        };

        with_timeout(Operation::Get, self.request_timeout, async {
            let request = self.request(Operation::Get, message)?;
            let response = self
                .kv
                .clone()
                .range(request)
                .await
                .map_err(|status| status_error(Operation::Get, status))?
                .into_inner();

            Ok(response.kvs.into_iter().next().map(|kv| kv.value))
        })
        .await
    }

    async fn watch(&self, key: &[u8]) -> crate::Result<WatchStream> {
        let create = proto::WatchCreateRequest {
            key: Bytes::copy_from_slice(key),
            ..Default::default()
        };

        // The request side has to stay open for as long as the subscription lives, as the
        // store cancels watches of a half-closed stream.
        let (requests, receiver) = mpsc::channel(1);
        requests
            .try_send(proto::WatchRequest {
                request_union: Some(RequestUnion::CreateRequest(create)),
            })
            .map_err(|err| Error::request(Operation::Watch, err.to_string()))?;

        let (responses, pending) = with_timeout(Operation::Watch, self.request_timeout, async {
            let request = self.request(Operation::Watch, ReceiverStream::new(receiver))?;
            let mut responses = self
                .watch
                .clone()
                .watch(request)
                .await
                .map_err(|status| status_error(Operation::Watch, status))?
                .into_inner();

            let confirmation = next_response(&mut responses).await?;
            if !confirmation.created {
                return Err(Error::decode(
                    Operation::Watch,
                    "the first watch response did not confirm the subscription",
                ));
            }
            Ok((responses, decode_events(confirmation.events)))
        })
        .await?;

        tracing::debug!("watch subscription confirmed");

        let state = WatchState {
            responses,
            pending: pending.into(),
            failed: false,
            _requests: requests,
        };
        Ok(futures_util::stream::unfold(state, WatchState::next).boxed())
    }
}

#[async_trait::async_trait]
impl Authenticator for GrpcStore {
    async fn authenticate(&self, username: &str, password: &str) -> crate::Result<AuthToken> {
        let request = tonic::Request::new(proto::AuthenticateRequest {
            name: username.to_owned(),
            password: password.to_owned(),
        });

        let response = with_timeout(Operation::Authenticate, self.request_timeout, async {
            self.auth
                .clone()
                .authenticate(request)
                .await
                .map_err(|status| Error::Auth {
                    message: format!("{:?}: {}", status.code(), status.message()),
                })
        })
        .await?
        .into_inner();

        if response.token.is_empty() {
            return Err(Error::Auth {
                message: "response did not contain a token".to_owned(),
            });
        }
        Ok(AuthToken::new(response.token))
    }
}

struct WatchState {
    responses: Streaming<proto::WatchResponse>,
    pending: VecDeque<WatchEvent>,
    failed: bool,
    _requests: mpsc::Sender<proto::WatchRequest>,
}

impl WatchState {
    async fn next(mut self) -> Option<(crate::Result<WatchEvent>, Self)> {
        if self.failed {
            return None;
        }

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some((Ok(event), self));
            }

            match next_response(&mut self.responses).await {
                Ok(response) => self.pending.extend(decode_events(response.events)),
                Err(err) => {
                    self.failed = true;
                    return Some((Err(err), self));
                }
            }
        }
    }
}

async fn next_response(
    responses: &mut Streaming<proto::WatchResponse>,
) -> crate::Result<proto::WatchResponse> {
    let response = responses
        .message()
        .await
        .map_err(|status| status_error(Operation::Watch, status))?
        .ok_or(Error::WatchClosed)?;

    if response.canceled {
        return Err(Error::status(
            Operation::Watch,
            "canceled",
            response.cancel_reason,
        ));
    }
    Ok(response)
}

fn decode_events(events: Vec<proto::Event>) -> Vec<WatchEvent> {
    events
        .into_iter()
        .map(|event| {
            let kind = match event.r#type() {
                EventType::Put => EventKind::Put,
                EventType::Delete => EventKind::Delete,
            };
            let kv = event.kv.unwrap_or_default();
            WatchEvent {
                kind,
                key: kv.key,
                value: kv.value,
                mod_revision: Revision(kv.mod_revision),
            }
        })
        .collect()
}
