//! The Service Dispatcher (§4.4): routes `POST /api/<Service>.<Method>` to
//! typed handlers after running the Session Authenticator, and the
//! local-loopback Unix-socket serving path (§4.9).

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Serialize, de::DeserializeOwned};
use tower_http::trace::TraceLayer;
use upspin_error::Error;
use upspin_types::UserName;

use crate::{
    auth::{AuthHeaders, Authenticator},
    headers,
    message::{decode_request, encode_response},
    session::Session,
    watch::WatchStream,
};

/// Request bodies larger than this are rejected before the handler runs
/// (§4.4 step 2's "policy-defined cap").
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Resolves the per-user backend a method handler needs, typically the
/// Bind registry's (§4.5) handle for this service.
pub trait Dialer<B>: Send + Sync {
    fn dial(&self, user: &UserName) -> BoxFuture<Result<B, Error>>;
}

impl<B, F, Fut> Dialer<B> for F
where
    F: Fn(&UserName) -> Fut + Send + Sync,
    Fut: Future<Output = Result<B, Error>> + Send + 'static,
{
    fn dial(&self, user: &UserName) -> BoxFuture<Result<B, Error>> {
        Box::pin(self(user))
    }
}

/// What a method handler produced, distinguishing the three response paths
/// of §4.4 step 5 / "Errors": a ready-to-send success envelope, an
/// application-level error (still travels as 200 per the envelope rule),
/// or a request the handler could not even decode (400).
pub enum HandlerOutcome {
    Encoded(Vec<u8>),
    AppError(Error),
    Malformed(Error),
}

pub type MethodHandler<B> =
    Arc<dyn Fn(B, Session, Vec<u8>) -> BoxFuture<HandlerOutcome> + Send + Sync>;

/// A `Watch`-shaped method handler (§4.10): unlike [`MethodHandler`], which
/// produces one encoded response, this produces a live event stream that
/// becomes the HTTP response body.
pub type WatchHandler<B> =
    Arc<dyn Fn(B, Session, Vec<u8>) -> BoxFuture<Result<WatchStream, Error>> + Send + Sync>;

/// Wraps a typed `(backend, session, request) -> Result<WatchStream, Error>`
/// function into the raw-bytes [`WatchHandler`] the dispatcher runs,
/// handling request decode (§4.10, §6.2).
pub fn typed_watch_method<B, Req, F, Fut>(f: F) -> WatchHandler<B>
where
    B: Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    F: Fn(B, Session, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WatchStream, Error>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |backend, session, body| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let request: Req = decode_request(&body)?;
            f(backend, session, request).await
        })
    })
}

/// Wraps a typed `(backend, session, request) -> Result<response, Error>`
/// function into the raw-bytes [`MethodHandler`] the dispatcher runs,
/// handling request decode and response envelope encoding (§3.1, §4.6).
pub fn typed_method<B, Req, Resp, F, Fut>(f: F) -> MethodHandler<B>
where
    B: Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(B, Session, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Error>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |backend, session, body| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let request: Req = match decode_request(&body) {
                Ok(request) => request,
                Err(err) => return HandlerOutcome::Malformed(err),
            };
            match f(backend, session, request).await {
                Ok(response) => HandlerOutcome::Encoded(encode_response(Ok(response))),
                Err(err) => HandlerOutcome::AppError(err),
            }
        })
    })
}

struct DispatcherState<B> {
    service_name: &'static str,
    authenticator: Arc<Authenticator>,
    dialer: Arc<dyn Dialer<B>>,
    methods: HashMap<&'static str, MethodHandler<B>>,
    watch_methods: HashMap<&'static str, WatchHandler<B>>,
}

/// Builds a [`Dispatcher`] one method at a time.
pub struct DispatcherBuilder<B> {
    service_name: &'static str,
    authenticator: Arc<Authenticator>,
    dialer: Arc<dyn Dialer<B>>,
    methods: HashMap<&'static str, MethodHandler<B>>,
    watch_methods: HashMap<&'static str, WatchHandler<B>>,
}

impl<B: Send + Sync + 'static> DispatcherBuilder<B> {
    pub fn new(
        service_name: &'static str,
        authenticator: Arc<Authenticator>,
        dialer: Arc<dyn Dialer<B>>,
    ) -> Self {
        Self {
            service_name,
            authenticator,
            dialer,
            methods: HashMap::new(),
            watch_methods: HashMap::new(),
        }
    }

    pub fn method(mut self, name: &'static str, handler: MethodHandler<B>) -> Self {
        self.methods.insert(name, handler);
        self
    }

    /// Registers a streaming method, e.g. `Dir.Watch` (§4.10).
    pub fn watch_method(mut self, name: &'static str, handler: WatchHandler<B>) -> Self {
        self.watch_methods.insert(name, handler);
        self
    }

    pub fn build(self) -> Dispatcher<B> {
        Dispatcher {
            state: Arc::new(DispatcherState {
                service_name: self.service_name,
                authenticator: self.authenticator,
                dialer: self.dialer,
                methods: self.methods,
                watch_methods: self.watch_methods,
            }),
        }
    }
}

/// A single service's method table and the machinery to serve it over HTTP
/// (§4.4). Every method not registered, and every request whose
/// `<Service>` component doesn't match, is a 404.
pub struct Dispatcher<B> {
    state: Arc<DispatcherState<B>>,
}

impl<B: Send + Sync + 'static> Dispatcher<B> {
    /// Builds the `axum` router for this service, mounted at `/api`.
    /// Callers combine multiple services' routers with
    /// [`Router::merge`](axum::Router::merge).
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/api/{method}", post(handle::<B>))
            .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

async fn handle<B: Send + Sync + 'static>(
    State(state): State<Arc<DispatcherState<B>>>,
    Path(full_method): Path<String>,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((service, method)) = full_method.split_once('.') else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if service != state.service_name {
        return StatusCode::NOT_FOUND.into_response();
    }
    enum Resolved<B> {
        Method(MethodHandler<B>),
        Watch(WatchHandler<B>),
    }
    let resolved = if let Some(handler) = state.methods.get(method).cloned() {
        Resolved::Method(handler)
    } else if let Some(handler) = state.watch_methods.get(method).cloned() {
        Resolved::Watch(handler)
    } else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let auth_headers = extract_auth_headers(&req_headers);
    let authenticated = match state.authenticator.authenticate(&auth_headers).await {
        Ok(authenticated) => authenticated,
        Err(err) => {
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            if let Ok(value) = err.msg.parse() {
                response.headers_mut().insert(headers::AUTH_ERROR.clone(), value);
            }
            return response;
        }
    };

    let backend = match state.dialer.dial(&authenticated.session.user).await {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!(%err, "failed to dial backend for authenticated session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session = authenticated.session.clone();
    let mut response = match resolved {
        Resolved::Method(handler) => {
            let outcome = (handler)(backend, session, body.to_vec()).await;
            match outcome {
                HandlerOutcome::Encoded(bytes) => bytes.into_response(),
                HandlerOutcome::AppError(err) =>
                    encode_response::<()>(Err(err)).into_response(),
                HandlerOutcome::Malformed(err) =>
                    return (StatusCode::BAD_REQUEST, err.msg).into_response(),
            }
        }
        Resolved::Watch(handler) => {
            match (handler)(backend, session, body.to_vec()).await {
                Ok(stream) => axum::body::Body::from_stream(stream).into_response(),
                Err(err) => {
                    tracing::error!(%err, "failed to install watch subscription");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
    };
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, "application/octet-stream".parse().expect("static"));
    for (name, value) in authenticated.response_headers {
        if let Ok(value) = value.parse() {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

fn extract_auth_headers(req_headers: &HeaderMap) -> AuthHeaders {
    let get = |name: &http::HeaderName| {
        req_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    AuthHeaders {
        auth_token: get(&headers::AUTH_TOKEN),
        auth_request: get(&headers::AUTH_REQUEST),
        proxy_request: get(&headers::PROXY_REQUEST),
    }
}

/// Serves `router` over a Unix domain socket at `socket_path` (§4.9). The
/// conventional path for a given `Transport::Local` socket id is
/// [`crate::local::unix_socket_path`]. Runs until the listener errors;
/// typically driven inside an [`upspin_tokio::Task`].
#[cfg(unix)]
pub async fn serve_unix(router: Router, socket_path: &std::path::Path) -> Result<(), Error> {
    use hyper_util::{
        rt::{TokioExecutor, TokioIo},
        server::conn::auto::Builder,
    };
    use tokio::net::UnixListener;
    use tower::Service;

    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)
        .map_err(|e| Error::io(format!("failed to bind unix socket {socket_path:?}: {e}")))?;

    loop {
        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| Error::io(format!("unix socket accept failed: {e}")))?;
        let io = TokioIo::new(stream);
        let tower_service = router.clone();
        tokio::spawn(async move {
            let hyper_service =
                hyper::service::service_fn(move |request: axum::extract::Request| {
                    tower_service.clone().call(request)
                });
            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection(io, hyper_service)
                .await
            {
                tracing::warn!(%err, "unix domain socket connection serving failed");
            }
        });
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use chrono::Utc;
    use upspin_crypto::{LocalFactotum, client_auth_message};

    use super::*;
    use crate::{
        auth::{self, KeyLookup},
        session::SessionCache,
    };
    use upspin_types::User;

    #[derive(Clone, Copy, serde::Serialize, serde::Deserialize)]
    struct PingArgs {
        seq: u32,
    }

    struct StaticKeyLookup(User);

    #[async_trait::async_trait]
    impl KeyLookup for StaticKeyLookup {
        async fn lookup(&self, user: &UserName) -> Result<User, Error> {
            if user == &self.0.name {
                Ok(self.0.clone())
            } else {
                Err(Error::not_exist("no such user"))
            }
        }
    }

    fn ping_dispatcher(
        factotum: &LocalFactotum,
        user: &UserName,
    ) -> Dispatcher<()> {
        let record = User {
            name: user.clone(),
            dirs: vec![],
            stores: vec![],
            public_key: factotum.public_key(),
        };
        let authenticator = Arc::new(Authenticator::new(
            Arc::new(SessionCache::new(16)),
            Arc::new(StaticKeyLookup(record)),
        ));
        let dialer: Arc<dyn Dialer<()>> =
            Arc::new(|_user: &UserName| async { Ok::<(), Error>(()) });
        DispatcherBuilder::new("Dir", authenticator, dialer)
            .method(
                "Ping",
                typed_method(|(), _session, args: PingArgs| async move { Ok(args) }),
            )
            .build()
    }

    async fn spawn_test_server(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn unknown_method_is_404() {
        let factotum = LocalFactotum::generate();
        let user = UserName::parse("alice@example.com").unwrap();
        let router = ping_dispatcher(&factotum, &user).into_router();
        let addr = spawn_test_server(router).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{addr}/api/Dir.NoSuchMethod"))
            .body(Vec::new())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handshake_and_call_round_trip() {
        let factotum = LocalFactotum::generate();
        let user = UserName::parse("alice@example.com").unwrap();
        let router = ping_dispatcher(&factotum, &user).into_router();
        let addr = spawn_test_server(router).await;

        let timestamp = auth::format_ansic(Utc::now());
        let msg = client_auth_message(user.as_str(), &timestamp);
        let sig = factotum.sign(&msg);
        let auth_request = format!("{user},{timestamp},{},{}", sig.r_hex(), sig.s_hex());

        let client = reqwest::Client::new();
        let body = crate::message::encode_request(&PingArgs { seq: 42 }).unwrap();
        let response = client
            .post(format!("http://{addr}/api/Dir.Ping"))
            .header(headers::AUTH_REQUEST.clone(), auth_request)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(&headers::AUTH_TOKEN).is_some());
        let bytes = response.bytes().await.unwrap();
        let decoded: PingArgs = crate::message::decode_response(&bytes).unwrap();
        assert_eq!(decoded.seq, 42);
    }

    #[tokio::test]
    async fn missing_credentials_are_401() {
        let factotum = LocalFactotum::generate();
        let user = UserName::parse("alice@example.com").unwrap();
        let router = ping_dispatcher(&factotum, &user).into_router();
        let addr = spawn_test_server(router).await;

        let client = reqwest::Client::new();
        let body = crate::message::encode_request(&PingArgs { seq: 1 }).unwrap();
        let response = client
            .post(format!("http://{addr}/api/Dir.Ping"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
