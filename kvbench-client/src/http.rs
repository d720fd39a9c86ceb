//! The HTTP+JSON binding, talking to the store's gRPC gateway.
//!
//! Keys and values travel as base64 strings inside JSON bodies. Watch subscriptions are
//! served as a chunked response carrying one JSON document per line.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use url::Url;

use crate::client::{USER_AGENT, normalize_endpoint, with_timeout};
use crate::{
    AuthToken, Authenticator, ClientOptions, Connect, Error, EventKind, Operation, Revision,
    StoreClient, WatchEvent, WatchStream,
};

/// Idle connections kept per host between requests.
const MAX_IDLE_CONNECTIONS: usize = 10;

/// How long an idle pooled connection is kept around.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a single line of a watch response.
const MAX_WATCH_LINE_LENGTH: usize = 16 * 1024 * 1024;

type Lines = FramedRead<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>, LinesCodec>;

#[derive(Debug)]
struct Urls {
    health: Url,
    put: Url,
    range: Url,
    watch: Url,
    authenticate: Url,
}

impl Urls {
    fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(&normalize_endpoint(endpoint))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            health: base.join("health")?,
            put: base.join("v3/kv/put")?,
            range: base.join("v3/kv/range")?,
            watch: base.join("v3/watch")?,
            authenticate: base.join("v3/auth/authenticate")?,
        })
    }
}

/// A [`StoreClient`] using the store's HTTP+JSON gateway.
///
/// Use [`Connect::connect`] to construct it.
#[derive(Debug)]
pub struct HttpStore {
    reqwest: reqwest::Client,
    urls: Urls,
    request_timeout: Duration,
    token: Option<AuthToken>,
}

impl HttpStore {
    fn post(&self, url: &Url) -> reqwest::RequestBuilder {
        let builder = self.reqwest.post(url.clone());
        match self.token {
            Some(ref token) => builder.header(AUTHORIZATION, token.as_str()),
            None => builder,
        }
    }

    /// Checks that the store answers at all, so a bad endpoint fails before any load is generated.
    async fn check_health(&self, options: &ClientOptions) -> crate::Result<()> {
        let connection_error = |cause: crate::BoxError| Error::Connection {
            endpoint: options.endpoint.clone(),
            cause,
        };

        let response = tokio::time::timeout(
            options.connect_timeout + options.request_timeout,
            self.reqwest.get(self.urls.health.clone()).send(),
        )
        .await
        .map_err(|elapsed| connection_error(elapsed.into()))?
        .map_err(|err| connection_error(err.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(connection_error(
                format!("health check answered with status {status}").into(),
            ));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Connect for HttpStore {
    async fn connect(options: &ClientOptions) -> crate::Result<Self> {
        let urls = Urls::new(&options.endpoint).map_err(|err| Error::Connection {
            endpoint: options.endpoint.clone(),
            cause: err.into(),
        })?;

        let reqwest = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .no_brotli()
            .no_deflate()
            .no_gzip()
            .no_zstd()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| Error::Connection {
                endpoint: options.endpoint.clone(),
                cause: err.into(),
            })?;

        let store = Self {
            reqwest,
            urls,
            request_timeout: options.request_timeout,
            token: None,
        };
        store.check_health(options).await?;

        tracing::debug!(endpoint = %options.endpoint, "connected to HTTP gateway");
        Ok(store)
    }

    fn with_token(self, token: AuthToken) -> Self {
        Self {
            token: Some(token),
            ..self
        }
    }
}

#[async_trait::async_trait]
impl StoreClient for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<Revision> {
        let body = PutRequest {
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
        };

        with_timeout(Operation::Put, self.request_timeout, async {
            let response = self
                .post(&self.urls.put)
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::request(Operation::Put, err))?;

            let response: PutResponse = read_json(Operation::Put, response).await?;
            Ok(Revision(response.header.revision))
        })
        .await
    }

    async fn get(&self, key: &[u8]) -> crate::Result<Option<Bytes>> {
        let body = RangeRequest {
            key: STANDARD.encode(key),
        };

        with_timeout(Operation::Get, self.request_timeout, async {
            let response = self
                .post(&self.urls.range)
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::request(Operation::Get, err))?;

            let response: RangeResponse = read_json(Operation::Get, response).await?;
            response
                .kvs
                .into_iter()
                .next()
                .map(|kv| decode_base64(Operation::Get, &kv.value))
                .transpose()
        })
        .await
    }

    async fn watch(&self, key: &[u8]) -> crate::Result<WatchStream> {
        let body = WatchRequest {
            create_request: WatchCreateRequest {
                key: STANDARD.encode(key),
            },
        };

        let (lines, pending) = with_timeout(Operation::Watch, self.request_timeout, async {
            let response = self
                .post(&self.urls.watch)
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::request(Operation::Watch, err))?;

            let status = response.status();
            if status != StatusCode::OK {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::status(Operation::Watch, status, message));
            }

            let body = response.bytes_stream().map_err(io::Error::other).boxed();
            let mut lines = FramedRead::new(
                StreamReader::new(body),
                LinesCodec::new_with_max_length(MAX_WATCH_LINE_LENGTH),
            );

            let confirmation = next_result(&mut lines).await?;
            if !confirmation.created {
                return Err(Error::decode(
                    Operation::Watch,
                    "the first watch response did not confirm the subscription",
                ));
            }
            // a confirmation may already carry events
            let pending = decode_events(confirmation.events)?;
            Ok((lines, pending))
        })
        .await?;

        tracing::debug!("watch subscription confirmed");

        let state = WatchState {
            lines,
            pending: pending.into(),
            failed: false,
        };
        Ok(futures_util::stream::unfold(state, WatchState::next).boxed())
    }
}

#[async_trait::async_trait]
impl Authenticator for HttpStore {
    async fn authenticate(&self, username: &str, password: &str) -> crate::Result<AuthToken> {
        let body = AuthenticateRequest {
            name: username,
            password,
        };

        let token = with_timeout(Operation::Authenticate, self.request_timeout, async {
            let response = self
                .reqwest
                .post(self.urls.authenticate.clone())
                .json(&body)
                .send()
                .await
                .map_err(|err| Error::request(Operation::Authenticate, err))?;

            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Auth {
                    message: format!("status {status}: {body}"),
                });
            }

            let response: AuthenticateResponse =
                response.json().await.map_err(|err| Error::Auth {
                    message: format!("malformed response: {err}"),
                })?;
            Ok(response.token)
        })
        .await?;

        match token {
            Some(token) if !token.is_empty() => Ok(AuthToken::new(token)),
            _ => Err(Error::Auth {
                message: "response did not contain a token".to_owned(),
            }),
        }
    }
}

struct WatchState {
    lines: Lines,
    pending: VecDeque<WatchEvent>,
    failed: bool,
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

            let events = next_result(&mut self.lines)
                .await
                .and_then(|result| decode_events(result.events));
            match events {
                Ok(events) => self.pending.extend(events),
                Err(err) => {
                    self.failed = true;
                    return Some((Err(err), self));
                }
            }
        }
    }
}

/// Reads the next non-empty line of a watch response and unwraps its result.
async fn next_result(lines: &mut Lines) -> crate::Result<WatchResult> {
    let line = loop {
        match lines.next().await {
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => break line,
            Some(Err(LinesCodecError::Io(err))) => {
                return Err(Error::request(Operation::Watch, err));
            }
            Some(Err(err)) => return Err(Error::decode(Operation::Watch, err)),
            None => return Err(Error::WatchClosed),
        }
    };

    let line: WatchLine =
        serde_json::from_str(&line).map_err(|err| Error::decode(Operation::Watch, err))?;
    match line {
        WatchLine {
            error: Some(error), ..
        } => Err(Error::status(Operation::Watch, error.http_code, error.message)),
        WatchLine {
            result: Some(result),
            ..
        } if result.canceled => Err(Error::status(
            Operation::Watch,
            "canceled",
            result.cancel_reason,
        )),
        WatchLine {
            result: Some(result),
            ..
        } => Ok(result),
        WatchLine { .. } => Err(Error::decode(
            Operation::Watch,
            "watch response carried neither a result nor an error",
        )),
    }
}

fn decode_events(events: Vec<JsonEvent>) -> crate::Result<Vec<WatchEvent>> {
    events.into_iter().map(JsonEvent::decode).collect()
}

fn decode_base64(operation: Operation, encoded: &str) -> crate::Result<Bytes> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|err| Error::decode(operation, err))
}

/// Reads a JSON response body, turning any non-200 status into an error.
async fn read_json<T: DeserializeOwned>(
    operation: Operation,
    response: reqwest::Response,
) -> crate::Result<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| Error::request(operation, err))?;

    if status != StatusCode::OK {
        return Err(Error::status(
            operation,
            status,
            String::from_utf8_lossy(&body),
        ));
    }

    serde_json::from_slice(&body).map_err(|err| Error::decode(operation, err))
}

/// The gateway renders 64-bit integers as JSON strings, but tolerate plain numbers too.
fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        String(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(number) => Ok(number),
        Int64::String(string) => string.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct PutResponse {
    #[serde(default)]
    header: ResponseHeader,
}

#[derive(Default, Deserialize)]
struct ResponseHeader {
    #[serde(default, deserialize_with = "int64")]
    revision: i64,
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<JsonKeyValue>,
}

#[derive(Default, Deserialize)]
struct JsonKeyValue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "int64")]
    mod_revision: i64,
}

#[derive(Serialize)]
struct WatchRequest {
    create_request: WatchCreateRequest,
}

#[derive(Serialize)]
struct WatchCreateRequest {
    key: String,
}

#[derive(Deserialize)]
struct WatchLine {
    result: Option<WatchResult>,
    error: Option<GatewayError>,
}

#[derive(Deserialize)]
struct WatchResult {
    #[serde(default)]
    created: bool,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: String,
    #[serde(default)]
    events: Vec<JsonEvent>,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    http_code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct JsonEvent {
    /// Omitted by the gateway for `PUT`, the default enum value.
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    kv: JsonKeyValue,
}

impl JsonEvent {
    fn decode(self) -> crate::Result<WatchEvent> {
        let kind = match self.kind.as_deref() {
            None | Some("PUT") => EventKind::Put,
            Some("DELETE") => EventKind::Delete,
            Some(other) => {
                return Err(Error::decode(
                    Operation::Watch,
                    format!("unknown event type `{other}`"),
                ));
            }
        };

        Ok(WatchEvent {
            kind,
            key: decode_base64(Operation::Watch, &self.kv.key)?,
            value: decode_base64(Operation::Watch, &self.kv.value)?,
            mod_revision: Revision(self.kv.mod_revision),
        })
    }
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    name: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    token: Option<String>,
}
