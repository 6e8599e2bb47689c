//! The server-side session authenticator (§4.2): turns the auth headers of
//! an incoming request into a [`Session`], minting and caching a fresh
//! bearer token on a successful handshake.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderName;
use rand_core::{OsRng, RngCore};
use upspin_crypto::{Factotum, Signature, client_auth_message, server_auth_message, verify};
use upspin_error::Error;
use upspin_types::{Endpoint, User, UserName};

use crate::{
    headers,
    session::{SESSION_LIFETIME, Session, SessionCache, SessionLookup},
};

/// The ANSIC timestamp layout used on the wire (Go's `time.ANSIC`).
const ANSIC_FORMAT: &str = "%a %b %e %T %Y";

/// Tolerance window for clock skew (§4.2): timestamps outside this window
/// are logged, never rejected.
const SKEW_FORWARD: Duration = Duration::from_secs(30);
const SKEW_BACKWARD: Duration = Duration::from_secs(45);

/// Minimum entropy, in bytes, minted into a fresh token (§3, §8 Property 4).
const TOKEN_BYTES: usize = 16;

/// Resolves a user name to its key-service record (§4.2 step 2). Backed by
/// the user-key cache in a full deployment; this trait only needs a lookup.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    async fn lookup(&self, user: &UserName) -> Result<User, Error>;
}

/// The transport-independent auth headers of one incoming request (§4.2,
/// §6.1).
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    pub auth_token: Option<String>,
    pub auth_request: Option<String>,
    pub proxy_request: Option<String>,
}

/// The parsed four fields of an `Upspin-Auth-Request` header.
///
/// Used on the server side to parse an incoming handshake, and on the
/// client side (`transport.rs`) to parse the reciprocal server-auth header
/// returned during a proxy handshake (§4.3 "Proxy mode").
pub(crate) struct ParsedAuthRequest {
    pub(crate) user: UserName,
    pub(crate) timestamp: String,
    pub(crate) sig: Signature,
}

pub(crate) fn parse_auth_request(value: &str) -> Result<ParsedAuthRequest, Error> {
    let fields: Vec<&str> = value.split(',').collect();
    let [user, timestamp, sig_r, sig_s] = fields.as_slice() else {
        return Err(Error::invalid(format!(
            "auth request must have exactly 4 comma-separated fields, got {}",
            fields.len()
        )));
    };
    let user = UserName::parse(user)?;
    let sig = Signature::from_hex_parts(sig_r, sig_s)
        .map_err(|e| Error::invalid(e.to_string()))?;
    Ok(ParsedAuthRequest {
        user,
        timestamp: timestamp.to_string(),
        sig,
    })
}

pub fn format_ansic(t: DateTime<Utc>) -> String {
    t.format(ANSIC_FORMAT).to_string()
}

fn parse_ansic(s: &str) -> Result<DateTime<Utc>, Error> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, ANSIC_FORMAT)
        .map_err(|e| Error::invalid(format!("invalid ANSIC timestamp {s:?}: {e}")))?;
    Ok(naive.and_utc())
}

/// Outcome of a successful [`Authenticator::authenticate`] call: the
/// resulting session plus any headers the caller must attach to the
/// response (§4.2 step 2's reciprocal proxy signature, the fresh token).
pub struct Authenticated {
    pub session: Session,
    pub response_headers: Vec<(HeaderName, String)>,
}

/// Runs the §4.2 algorithm against a [`SessionCache`] and a [`KeyLookup`].
pub struct Authenticator {
    cache: Arc<SessionCache>,
    key_lookup: Arc<dyn KeyLookup>,
    server_identity: Option<(UserName, Arc<dyn Factotum>)>,
}

impl Authenticator {
    pub fn new(cache: Arc<SessionCache>, key_lookup: Arc<dyn KeyLookup>) -> Self {
        Self {
            cache,
            key_lookup,
            server_identity: None,
        }
    }

    /// The number of live sessions currently cached. Exposed for tests that
    /// want to observe handshake bookkeeping without reaching into private
    /// fields (§8 Property 4).
    pub fn session_count(&self) -> usize {
        self.cache.len()
    }

    /// Equips this authenticator to sign reciprocal proxy handshakes
    /// (§4.2 step 2, §4.3 "Proxy mode") as `user`.
    pub fn with_server_identity(
        mut self,
        user: UserName,
        factotum: Arc<dyn Factotum>,
    ) -> Self {
        self.server_identity = Some((user, factotum));
        self
    }

    pub async fn authenticate(
        &self,
        headers: &AuthHeaders,
    ) -> Result<Authenticated, Error> {
        let now = SystemTime::now();

        if let Some(token) = headers.auth_token.as_deref().filter(|t| !t.is_empty()) {
            return match self.cache.lookup(token, now) {
                SessionLookup::Found(session) => Ok(Authenticated {
                    session,
                    response_headers: Vec::new(),
                }),
                SessionLookup::Expired => Err(Error::permission("auth token expired")),
                SessionLookup::NotFound => Err(Error::permission("user not authenticated")),
            };
        }

        let request = headers
            .auth_request
            .as_deref()
            .ok_or_else(|| Error::permission("user not authenticated"))?;
        let parsed = parse_auth_request(request)?;

        let user_record = self.key_lookup.lookup(&parsed.user).await?;

        check_skew(&parsed.timestamp, &parsed.user);

        let message = client_auth_message(parsed.user.as_str(), &parsed.timestamp);
        verify(&user_record.public_key, &message, &parsed.sig)
            .map_err(|_| Error::permission("invalid signature"))?;

        let token = mint_token();
        let expiry = now + SESSION_LIFETIME;

        let mut response_headers =
            vec![(headers::AUTH_TOKEN.clone(), token.clone())];

        let proxied_endpoint = match headers.proxy_request.as_deref() {
            None => None,
            Some(proxy) => {
                let endpoint = Endpoint::parse(proxy)?;
                if let Some((server_user, factotum)) = &self.server_identity {
                    let reply_timestamp = format_ansic(Utc::now());
                    let reply_message =
                        server_auth_message(server_user.as_str(), &reply_timestamp);
                    let sig = factotum.sign(&reply_message);
                    response_headers.push((
                        headers::AUTH_REQUEST.clone(),
                        format!(
                            "{},{},{},{}",
                            server_user,
                            reply_timestamp,
                            sig.r_hex(),
                            sig.s_hex()
                        ),
                    ));
                }
                Some(endpoint)
            }
        };

        let session = Session {
            user: parsed.user,
            token,
            expiry,
            proxied_endpoint,
        };
        self.cache.insert(session.clone());

        Ok(Authenticated {
            session,
            response_headers,
        })
    }
}

fn check_skew(timestamp: &str, user: &UserName) {
    let Ok(parsed) = parse_ansic(timestamp) else {
        tracing::warn!(%user, %timestamp, "could not parse auth timestamp, continuing");
        return;
    };
    let now = Utc::now();
    let delta = now.signed_duration_since(parsed);
    if delta > chrono::Duration::from_std(SKEW_BACKWARD).expect("fits") {
        tracing::warn!(%user, %timestamp, "auth timestamp is in the past beyond skew tolerance");
    } else if -delta > chrono::Duration::from_std(SKEW_FORWARD).expect("fits") {
        tracing::warn!(%user, %timestamp, "auth timestamp is in the future beyond skew tolerance");
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
