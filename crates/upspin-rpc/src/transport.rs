//! The authenticated transport client (§4.3): `Invoke`, connection setup,
//! keep-alive, and proxy mode.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use chrono::Utc;
use futures::StreamExt;
use rand_core::{OsRng, RngCore};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use upspin_crypto::{Factotum, client_auth_message, server_auth_message, verify};
use upspin_error::Error;
use upspin_tokio::Task;
use upspin_types::{Endpoint, Transport, UserName};

use crate::{
    auth::{self, KeyLookup, parse_auth_request},
    headers,
    local::{is_loopback_host, local_addr_for},
    message::{decode_response, encode_request},
    ping::PingArgs,
    session::SESSION_LIFETIME,
};

/// Client-side identity used to sign the auth handshake (§4.2 step 2).
#[derive(Clone)]
pub struct ClientIdentity {
    pub user: UserName,
    pub factotum: Arc<dyn Factotum>,
}

/// Whether the client is willing to dial over plain TCP. Mirrors the
/// source's `rpc.Security` flag. TLS is always used for non-loopback
/// destinations regardless of this setting (§4.3 "Connection setup").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Security {
    Secure,
    NoSecurity,
}

/// The recommended default keep-alive wake interval (§4.3).
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// The minimum allowed keep-alive interval (§4.3).
pub const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// The client treats a token as stale this long before its assumed expiry
/// and eagerly re-authenticates (§4.3).
const STALE_BUFFER: Duration = Duration::from_secs(60 * 60);
/// Upper bound on backoff-retried attempts for a transport-level (`Io`-kind)
/// failure within a single `Invoke` (§7 "Propagation").
const MAX_IO_RETRIES: usize = 3;

/// Everything needed to dial a [`TransportClient`] (§4.3 "Connection
/// setup", "Proxy mode").
pub struct ClientConfig {
    /// The endpoint to dial.
    pub endpoint: Endpoint,
    /// The service name this client calls methods on, e.g. `"Dir"`; used to
    /// build the `/api/<Service>.<Method>` path (§6.1) and the keep-alive
    /// `Ping` call.
    pub service: &'static str,
    pub identity: ClientIdentity,
    pub security: Security,
    /// TLS trust anchors; `None` uses the default webpki roots.
    pub tls_roots: Option<Arc<upspin_config::TlsPool>>,
    /// `Some(endpoint)` if this client is talking to `self.endpoint` on
    /// behalf of `endpoint` (§4.3 "Proxy mode").
    pub proxy_for: Option<Endpoint>,
    /// Used to cryptographically verify the proxy server's reciprocal
    /// signature, beyond the name comparison of §8 Property 6. Optional:
    /// without it the client still enforces the name check.
    pub key_lookup: Option<Arc<dyn KeyLookup>>,
    pub keep_alive_interval: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint, service: &'static str, identity: ClientIdentity) -> Self {
        Self {
            endpoint,
            service,
            identity,
            security: Security::Secure,
            tls_roots: None,
            proxy_for: None,
            key_lookup: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

struct TokenState {
    token: Option<String>,
    expiry: SystemTime,
    last_activity: SystemTime,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    service: &'static str,
    identity: ClientIdentity,
    proxy_for: Option<Endpoint>,
    key_lookup: Option<Arc<dyn KeyLookup>>,
    state: Mutex<TokenState>,
    handshake_lock: tokio::sync::Mutex<()>,
    keep_alive_task: Mutex<Option<Task<()>>>,
    closed: AtomicBool,
}

/// The `Invoke("Service/Method", req, resp)` primitive and its connection
/// management (§4.3). Cheap to clone; clones share the same connection,
/// token cache and keep-alive task.
#[derive(Clone)]
pub struct TransportClient(Arc<Inner>);

impl TransportClient {
    /// Dials `config.endpoint`. Fails synchronously (no network I/O) for an
    /// `Unassigned` endpoint or an insecure dial to a non-loopback
    /// destination (§4.3, §8 scenario (d)).
    pub fn dial(config: ClientConfig) -> Result<Self, Error> {
        if config.endpoint.is_unassigned() {
            return Err(Error::invalid("cannot dial an unassigned endpoint"));
        }

        let host_port = match config.endpoint.transport {
            Transport::Remote => default_port(config.endpoint.addr.as_str()),
            Transport::Local => local_addr_for(config.endpoint.addr.as_str()).to_string(),
            Transport::InProcess =>
                return Err(Error::invalid(
                    "inprocess endpoints are dialed via the Bind registry, \
                     not the HTTP transport client",
                )),
            Transport::Unassigned => unreachable!("checked above"),
        };

        let loopback = is_loopback_host(&host_port);
        let scheme = match config.security {
            Security::NoSecurity if loopback => "http",
            Security::NoSecurity =>
                return Err(Error::io(
                    "insecure dial to non-loopback destination",
                )),
            Security::Secure => "https",
        };

        let mut builder = reqwest::Client::builder();
        if scheme == "https" {
            let pool = config
                .tls_roots
                .unwrap_or_else(|| Arc::new(upspin_config::TlsPool::os_roots()));
            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(pool.as_root_cert_store().clone())
                .with_no_client_auth();
            builder = builder.use_preconfigured_tls(tls_config).https_only(true);
        } else {
            builder = builder.https_only(false);
        }
        let http = builder
            .build()
            .map_err(|e| Error::io(format!("failed to build HTTP client: {e}")))?;

        let base_url = format!("{scheme}://{host_port}/api");
        let now = SystemTime::now();
        let inner = Arc::new(Inner {
            http,
            base_url,
            service: config.service,
            identity: config.identity,
            proxy_for: config.proxy_for,
            key_lookup: config.key_lookup,
            state: Mutex::new(TokenState {
                token: None,
                expiry: now,
                last_activity: now,
            }),
            handshake_lock: tokio::sync::Mutex::new(()),
            keep_alive_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let client = Self(inner);
        let keep_alive_interval = config
            .keep_alive_interval
            .max(MIN_KEEP_ALIVE_INTERVAL);
        let task = Task::spawn(
            format!("upspin-rpc-keepalive-{}", client.0.service),
            client.clone().keep_alive_loop(keep_alive_interval),
        );
        *client.0.keep_alive_task.lock().expect("lock poisoned") = Some(task);

        Ok(client)
    }

    /// The `Invoke` primitive: sends `req` to `<service>.<method>` and
    /// decodes the response (§4.3, §4.4).
    pub async fn invoke<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp, Error>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = encode_request(req)?;
        let bytes = self.invoke_raw(method, body).await?;
        decode_response(&bytes)
    }

    /// Retries a transport-level (`Io`-kind) failure with backoff; auth and
    /// application errors are never retried here (§7 "Propagation").
    async fn invoke_raw(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>, Error> {
        let mut backoff = upspin_std::backoff::get_backoff_iter();
        let mut attempt = 0;
        loop {
            match self.invoke_once(method, &body).await {
                Ok(bytes) => return Ok(bytes),
                Err(err)
                    if err.kind == upspin_error::Kind::Io && attempt + 1 < MAX_IO_RETRIES =>
                {
                    let wait = backoff.next().expect("backoff iterator never ends");
                    tracing::warn!(
                        service = self.0.service,
                        %err,
                        attempt,
                        ?wait,
                        "transport-level failure, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn invoke_once(&self, method: &str, body: &[u8]) -> Result<Vec<u8>, Error> {
        let response = self.send_authenticated(method, body.to_vec()).await?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::io(format!("failed reading response body: {e}")))?;
        if !status.is_success() {
            return Err(Error::io(format!("transport error: HTTP {status}")));
        }
        Ok(bytes.to_vec())
    }

    /// Opens a long-lived `Watch` stream (§4.10): sends `req` to
    /// `<service>.<method>` exactly like [`Self::invoke`], but treats the
    /// response body as a stream of length-framed [`crate::watch::WatchEvent`]s
    /// rather than a single encoded message, and spawns a background task
    /// (owned by the returned subscription) to decode it.
    pub async fn watch<Req>(
        &self,
        method: &str,
        req: &Req,
    ) -> Result<crate::watch::WatchSubscription, Error>
    where
        Req: Serialize,
    {
        let body = encode_request(req)?;
        let response = self.send_authenticated(method, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::io(format!("transport error: HTTP {status}")));
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::io(format!("watch stream read failed: {e}"))));
        Ok(crate::watch::spawn_client_watch(stream))
    }

    /// Performs one `Invoke`'s worth of handshake bookkeeping (token
    /// attach-or-handshake, `AuthError` handling, auth-token caching) and
    /// returns the still-unread [`reqwest::Response`]. Shared by
    /// [`Self::invoke_raw`] (which reads the body fully) and [`Self::watch`]
    /// (which streams it).
    async fn send_authenticated(
        &self,
        method: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, Error> {
        let path = format!("{}.{}", self.0.service, method);
        for attempt in 0..2 {
            let needs_handshake = !self.token_is_fresh();
            let mut request = self
                .0
                .http
                .post(format!("{}/{}", self.0.base_url, path))
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(body.clone());

            if needs_handshake {
                self.await_handshake_slot().await;
                if !self.token_is_fresh() {
                    let header = self.build_auth_request_header();
                    request = request.header(headers::AUTH_REQUEST.clone(), header);
                    if let Some(proxy_for) = &self.0.proxy_for {
                        request = request
                            .header(headers::PROXY_REQUEST.clone(), proxy_for.to_string());
                    }
                } else {
                    request = self.attach_token(request);
                }
            } else {
                request = self.attach_token(request);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::io(format!("request failed: {e}")))?;
            self.touch_activity();

            if let Some(auth_error) = response.headers().get(&headers::AUTH_ERROR) {
                let msg = auth_error
                    .to_str()
                    .unwrap_or("authentication error")
                    .to_string();
                self.clear_token();
                if attempt == 0 {
                    continue;
                }
                return Err(Error::permission(msg));
            }

            if let Some(token_header) = response.headers().get(&headers::AUTH_TOKEN) {
                let token = token_header
                    .to_str()
                    .map_err(|_| Error::internal("non-UTF8 auth token header"))?
                    .to_string();
                if self.0.proxy_for.is_some() {
                    self.verify_server_user(&response).await?;
                }
                self.store_token(token);
            }

            return Ok(response);
        }
        Err(Error::permission("authentication handshake failed after retry"))
    }

    /// Issues a liveness `Ping` against the bound service (§4.8, §6.2).
    pub async fn ping(&self, seq: u32) -> Result<u32, Error> {
        let resp: PingArgs = self.invoke("Ping", &PingArgs { seq }).await?;
        Ok(resp.seq)
    }

    /// Terminates the keep-alive task, closes the connection, and
    /// invalidates any cached token. Safe to call multiple times (§8
    /// Property 9).
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.0.keep_alive_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        self.clear_token();
    }

    fn attach_token(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.0.state.lock().expect("lock poisoned").token.clone();
        match token {
            Some(token) => request.header(headers::AUTH_TOKEN.clone(), token),
            None => request,
        }
    }

    fn token_is_fresh(&self) -> bool {
        let state = self.0.state.lock().expect("lock poisoned");
        let Some(_) = &state.token else { return false };
        match state.expiry.checked_sub(STALE_BUFFER) {
            Some(stale_at) => SystemTime::now() < stale_at,
            None => false,
        }
    }

    fn store_token(&self, token: String) {
        let mut state = self.0.state.lock().expect("lock poisoned");
        state.token = Some(token);
        // The wire doesn't carry an explicit expiry; the client assumes the
        // server's fixed session lifetime (§3, §4.2).
        state.expiry = SystemTime::now() + SESSION_LIFETIME;
    }

    fn clear_token(&self) {
        self.0.state.lock().expect("lock poisoned").token = None;
    }

    fn touch_activity(&self) {
        self.0.state.lock().expect("lock poisoned").last_activity = SystemTime::now();
    }

    fn idle_duration(&self) -> Duration {
        let last_activity = self.0.state.lock().expect("lock poisoned").last_activity;
        SystemTime::now()
            .duration_since(last_activity)
            .unwrap_or(Duration::ZERO)
    }

    /// Serializes concurrent handshakes: only one caller actually sends the
    /// `AuthRequest`; the rest wait and then observe the fresh token.
    async fn await_handshake_slot(&self) {
        let _guard = self.0.handshake_lock.lock().await;
    }

    fn build_auth_request_header(&self) -> String {
        let timestamp = auth::format_ansic(Utc::now());
        let message = client_auth_message(self.0.identity.user.as_str(), &timestamp);
        let sig = self.0.identity.factotum.sign(&message);
        format!(
            "{},{},{},{}",
            self.0.identity.user,
            timestamp,
            sig.r_hex(),
            sig.s_hex()
        )
    }

    /// Verifies the reciprocal server-auth header returned during a proxy
    /// handshake names the same user as this client's own identity (§4.3
    /// "Proxy mode", §8 Property 6).
    async fn verify_server_user(&self, response: &reqwest::Response) -> Result<(), Error> {
        let header: &HeaderValue = response
            .headers()
            .get(&headers::AUTH_REQUEST)
            .ok_or_else(|| {
                Error::permission("proxy handshake did not include a server auth header")
            })?;
        let value = header
            .to_str()
            .map_err(|_| Error::internal("non-UTF8 server auth header"))?;
        let parsed = parse_auth_request(value)?;

        if let Some(key_lookup) = &self.0.key_lookup {
            let server_record = key_lookup.lookup(&parsed.user).await?;
            let message = server_auth_message(parsed.user.as_str(), &parsed.timestamp);
            verify(&server_record.public_key, &message, &parsed.sig)
                .map_err(|_| Error::permission("server auth signature did not verify"))?;
        }

        if parsed.user != self.0.identity.user {
            return Err(Error::permission(format!(
                "proxy server authenticated as {} but this client is configured as {}",
                parsed.user, self.0.identity.user
            )));
        }
        Ok(())
    }

    /// Whether `self` and `other` share the same underlying connection
    /// state (token cache, keep-alive task). Exposed only for tests that
    /// need to prove a bind/reuse path didn't silently redial (§4.5).
    #[cfg(any(test, feature = "test-utils"))]
    pub fn is_same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    async fn keep_alive_loop(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.0.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.idle_duration() < interval {
                continue;
            }
            let seq = OsRng.next_u32();
            match self.ping(seq).await {
                Ok(echoed) if echoed == seq => {
                    tracing::debug!(service = self.0.service, "keep-alive ping ok");
                }
                Ok(_) => {
                    tracing::warn!(
                        service = self.0.service,
                        "keep-alive ping returned mismatched sequence"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        service = self.0.service,
                        %error,
                        "keep-alive ping failed; next real call will observe it"
                    );
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.keep_alive_task.lock().expect("lock poisoned").take() {
            task.abort();
        }
    }
}

fn default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:443")
    }
}
