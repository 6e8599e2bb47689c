//! Identity, signing and verification (§4.1).
//!
//! A [`Factotum`] owns a user's private key and exposes only `sign` and
//! `public_key`; the private key itself is never serialized or otherwise
//! exposed. Verification is delegated to the `p256`/`ecdsa` crates, which are
//! constant-time with respect to the signature as required by §4.1.
//!
//! Two "magic" strings ([`CLIENT_AUTH_MAGIC`], [`SERVER_AUTH_MAGIC`]) bind a
//! signed auth message to a direction (client-to-server vs. server-to-
//! client) so that one can never be replayed as the other.

use std::fmt;

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use upspin_error::{Error as CoreError, Kind};

/// The domain-separation string for a client authenticating to a server.
/// §4.1: implementations must never accept a message signed for one
/// direction when presented for the other.
pub const CLIENT_AUTH_MAGIC: &[u8] = b"Upspin-Auth-Client-V1";
/// The domain-separation string for a server authenticating back to a
/// proxying client (§4.2 step 2, §4.3 "Proxy mode").
pub const SERVER_AUTH_MAGIC: &[u8] = b"Upspin-Auth-Server-V1";

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("invalid private key encoding")]
    InvalidPrivateKey,
}

impl From<Error> for CoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::VerificationFailed => CoreError::permission(e.to_string()),
            _ => CoreError::invalid(e.to_string()),
        }
    }
}

/// A P-256 public key, SEC1-encoded (33 bytes compressed).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, Error> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidPublicKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_sec1_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidPublicKey)?;
        Self::from_sec1_bytes(&bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Error> {
        Self::from_hex(&s)
    }
}

impl From<PublicKey> for String {
    fn from(pk: PublicKey) -> String {
        pk.to_hex()
    }
}

/// A `(R, S)` signature pair over the user's curve (§3).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn r_hex(&self) -> String {
        hex::encode(self.r)
    }
    pub fn s_hex(&self) -> String {
        hex::encode(self.s)
    }

    pub fn from_hex_parts(r_hex: &str, s_hex: &str) -> Result<Self, Error> {
        let r = decode_32(r_hex)?;
        let s = decode_32(s_hex)?;
        Ok(Self { r, s })
    }

    fn to_p256(self) -> Result<P256Signature, Error> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        P256Signature::from_slice(&bytes)
            .map_err(|_| Error::InvalidSignatureEncoding)
    }

    fn from_p256(sig: P256Signature) -> Self {
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self { r, s }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(r={}, s={})", self.r_hex(), self.s_hex())
    }
}

fn decode_32(s: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(s).map_err(|_| Error::InvalidSignatureEncoding)?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidSignatureEncoding)
}

/// A capability object that can sign on behalf of a user without ever
/// divulging the private key (§4.1, §9: "Factotum as an interface").
pub trait Factotum: Send + Sync {
    fn sign(&self, message: &[u8]) -> Signature;
    fn public_key(&self) -> PublicKey;
}

/// The standard in-memory [`Factotum`], backed by a P-256 signing key.
/// Never implements `Serialize`/`Debug` on the key material itself.
pub struct LocalFactotum {
    signing_key: SigningKey,
    public_key: PublicKey,
    // Held only so the key can be re-exported (e.g. to persist to the
    // `secrets` path in the config file); never logged or printed.
    secret_bytes: SecretVec<u8>,
}

impl LocalFactotum {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| Error::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let secret_bytes = SecretVec::new(signing_key.to_bytes().to_vec());
        Self {
            signing_key,
            public_key: PublicKey(verifying_key),
            secret_bytes,
        }
    }

    /// Exports the raw scalar bytes, e.g. for writing to the `secrets` path
    /// named in the config file (§6.4). Caller is responsible for not
    /// leaking the exposed bytes.
    pub fn expose_secret_bytes(&self) -> &[u8] {
        self.secret_bytes.expose_secret()
    }
}

impl Factotum for LocalFactotum {
    fn sign(&self, message: &[u8]) -> Signature {
        let sig: P256Signature = self.signing_key.sign(message);
        Signature::from_p256(sig)
    }

    fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }
}

/// Verifies `sig` over `message` under `public_key`. Constant-time with
/// respect to the signature, per §4.1.
pub fn verify(
    public_key: &PublicKey,
    message: &[u8],
    sig: &Signature,
) -> Result<(), Error> {
    let p256_sig: P256Signature = sig.to_p256()?;
    public_key
        .0
        .verify(message, &p256_sig)
        .map_err(|_| Error::VerificationFailed)
}

/// Builds the message a client signs to authenticate to a server (§4.2 step
/// 2): `userName || clientMagic || timestamp`.
pub fn client_auth_message(user_name: &str, timestamp: &str) -> Vec<u8> {
    build_auth_message(user_name, CLIENT_AUTH_MAGIC, timestamp)
}

/// Builds the reciprocal message a server signs back to a proxying client
/// (§4.2 step 2, §4.3 proxy mode): `serverUserName || serverMagic ||
/// timestamp`.
pub fn server_auth_message(server_user_name: &str, timestamp: &str) -> Vec<u8> {
    build_auth_message(server_user_name, SERVER_AUTH_MAGIC, timestamp)
}

fn build_auth_message(user_name: &str, magic: &[u8], timestamp: &str) -> Vec<u8> {
    let mut msg =
        Vec::with_capacity(user_name.len() + magic.len() + timestamp.len());
    msg.extend_from_slice(user_name.as_bytes());
    msg.extend_from_slice(magic);
    msg.extend_from_slice(timestamp.as_bytes());
    msg
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrip() {
        let factotum = LocalFactotum::generate();
        let msg = client_auth_message("alice@example.com", "20260727T000000Z");
        let sig = factotum.sign(&msg);
        verify(&factotum.public_key(), &msg, &sig).unwrap();
    }

    #[test]
    fn wrong_key_fails_verification() {
        let a = LocalFactotum::generate();
        let b = LocalFactotum::generate();
        let msg = client_auth_message("alice@example.com", "20260727T000000Z");
        let sig = a.sign(&msg);
        let err = verify(&b.public_key(), &msg, &sig).unwrap_err();
        assert!(matches!(err, Error::VerificationFailed));
    }

    #[test]
    fn client_and_server_magic_are_not_interchangeable() {
        let factotum = LocalFactotum::generate();
        let client_msg =
            client_auth_message("alice@example.com", "20260727T000000Z");
        let server_msg =
            server_auth_message("alice@example.com", "20260727T000000Z");
        assert_ne!(client_msg, server_msg);

        let sig = factotum.sign(&client_msg);
        // A signature over the client message must not verify against the
        // server message, even for the same user name and timestamp.
        assert!(verify(&factotum.public_key(), &server_msg, &sig).is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let factotum = LocalFactotum::generate();
        let pk = factotum.public_key();
        let hex = pk.to_hex();
        let pk2 = PublicKey::from_hex(&hex).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn signature_bcs_roundtrip() {
        let factotum = LocalFactotum::generate();
        let msg = b"hello";
        let sig = factotum.sign(msg);
        let bytes = bcs::to_bytes(&sig).unwrap();
        let sig2: Signature = bcs::from_bytes(&bytes).unwrap();
        assert_eq!(sig.r, sig2.r);
        assert_eq!(sig.s, sig2.s);
    }
}
