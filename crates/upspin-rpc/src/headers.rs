//! Wire header names (§6.1). Case-insensitive per HTTP, exact spelling as
//! given here.

use http::HeaderName;

pub static AUTH_TOKEN: HeaderName = HeaderName::from_static("upspin-auth-token");
pub static AUTH_REQUEST: HeaderName =
    HeaderName::from_static("upspin-auth-request");
pub static AUTH_ERROR: HeaderName = HeaderName::from_static("upspin-auth-error");
pub static PROXY_REQUEST: HeaderName =
    HeaderName::from_static("upspin-proxy-request");
