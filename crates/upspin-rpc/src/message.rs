//! Wire encoding of request/response bodies (§3.1, §6.1).
//!
//! Every response message carries an optional marshaled error; if present
//! it supersedes all other fields (§4.6, §6.2). Requests carry no error
//! field — they are just the bare, `bcs`-encoded argument struct.

use serde::{Serialize, de::DeserializeOwned};
use upspin_error::Error;

/// The on-wire shape of every RPC response: either a decoded payload or an
/// error, never both.
#[derive(Serialize, serde::Deserialize)]
struct Envelope<T> {
    error: Option<Error>,
    payload: Option<T>,
}

/// Encodes a request argument struct for the HTTP body.
pub fn encode_request<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bcs::to_bytes(value).map_err(Error::from)
}

/// Decodes a request argument struct from the HTTP body.
pub fn decode_request<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bcs::from_bytes(bytes).map_err(Error::from)
}

/// Encodes a response: `Ok(v)` becomes a payload-only envelope, `Err(e)`
/// becomes an error-only envelope. Always produces a 200-worthy body per
/// §4.4 ("application-level errors ... travel as a success response").
pub fn encode_response<T: Serialize>(result: Result<T, Error>) -> Vec<u8> {
    let envelope = match result {
        Ok(payload) => Envelope {
            error: None,
            payload: Some(payload),
        },
        Err(error) => Envelope::<T> {
            error: Some(error),
            payload: None,
        },
    };
    // Encoding a well-formed envelope of concrete types cannot fail.
    bcs::to_bytes(&envelope).expect("envelope encoding is infallible")
}

/// Decodes a response envelope, returning the application error (if any)
/// verbatim and ignoring other fields, per §4.6 "Error decoding".
pub fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let envelope: Envelope<T> = bcs::from_bytes(bytes).map_err(Error::from)?;
    match envelope.error {
        Some(error) => Err(error),
        None => envelope.payload.ok_or_else(|| {
            Error::internal("response envelope had neither error nor payload")
        }),
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;
    use upspin_error::Kind;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn success_roundtrips() {
        let bytes = encode_response(Ok(Ping { seq: 7 }));
        let decoded: Ping = decode_response(&bytes).unwrap();
        assert_eq!(decoded, Ping { seq: 7 });
    }

    #[test]
    fn error_supersedes_payload() {
        let bytes: Vec<u8> =
            encode_response::<Ping>(Err(Error::not_exist("no such path")));
        let err = decode_response::<Ping>(&bytes).unwrap_err();
        assert_eq!(err.kind, Kind::NotExist);
    }

    #[test]
    fn request_roundtrips_without_envelope() {
        let bytes = encode_request(&Ping { seq: 42 }).unwrap();
        let decoded: Ping = decode_request(&bytes).unwrap();
        assert_eq!(decoded, Ping { seq: 42 });
    }
}
