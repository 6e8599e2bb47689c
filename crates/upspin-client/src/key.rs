//! The Key facade: `Lookup` and `Put` against the Key service, each exactly
//! one `Invoke` round-trip (§4.6).

use serde::{Deserialize, Serialize};
use upspin_error::Error;
use upspin_rpc::TransportClient;
use upspin_types::{Endpoint, User, UserName};

#[derive(Serialize, Deserialize)]
struct LookupArgs {
    name: UserName,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    user: User,
}

/// Thin wrapper turning each Key method into a transport call plus
/// message encode/decode. Holds no state of its own.
#[derive(Clone)]
pub struct KeyClient {
    transport: TransportClient,
}

impl KeyClient {
    pub fn new(transport: TransportClient) -> Self {
        Self { transport }
    }

    pub async fn lookup(&self, name: &UserName) -> Result<User, Error> {
        self.transport
            .invoke(
                "Lookup",
                &LookupArgs {
                    name: name.clone(),
                },
            )
            .await
    }

    pub async fn put(&self, user: &User) -> Result<(), Error> {
        self.transport
            .invoke(
                "Put",
                &PutArgs {
                    user: user.clone(),
                },
            )
            .await
    }

    pub async fn endpoint(&self) -> Result<Endpoint, Error> {
        self.transport.invoke("Endpoint", &()).await
    }

    pub async fn ping(&self, seq: u32) -> Result<u32, Error> {
        self.transport.ping(seq).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_args_roundtrip() {
        let name = UserName::parse("alice@example.com").unwrap();
        let bytes = upspin_rpc::message::encode_request(&LookupArgs {
            name: name.clone(),
        })
        .unwrap();
        let decoded: LookupArgs = upspin_rpc::message::decode_request(&bytes).unwrap();
        assert_eq!(decoded.name, name);
    }
}
