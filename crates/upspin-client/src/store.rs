//! The Storage facade: `Get`, `Put`, `Delete` against the Store service
//! (§4.6, §6.2).

use serde::{Deserialize, Serialize};
use upspin_error::Error;
use upspin_rpc::TransportClient;
use upspin_types::{Endpoint, Location, RefData, Reference};

#[derive(Serialize, Deserialize)]
struct GetArgs {
    reference: Reference,
}

#[derive(Serialize, Deserialize)]
struct GetResult {
    data: Vec<u8>,
    ref_data: RefData,
    locations: Vec<Location>,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DeleteArgs {
    reference: Reference,
}

/// Thin wrapper turning each Store method into a transport call plus
/// message encode/decode. Holds no state of its own.
#[derive(Clone)]
pub struct StoreClient {
    transport: TransportClient,
}

impl StoreClient {
    pub fn new(transport: TransportClient) -> Self {
        Self { transport }
    }

    pub async fn get(
        &self,
        reference: &Reference,
    ) -> Result<(Vec<u8>, RefData, Vec<Location>), Error> {
        let result: GetResult = self
            .transport
            .invoke(
                "Get",
                &GetArgs {
                    reference: reference.clone(),
                },
            )
            .await?;
        Ok((result.data, result.ref_data, result.locations))
    }

    pub async fn put(&self, data: Vec<u8>) -> Result<RefData, Error> {
        self.transport.invoke("Put", &PutArgs { data }).await
    }

    pub async fn delete(&self, reference: &Reference) -> Result<(), Error> {
        self.transport
            .invoke(
                "Delete",
                &DeleteArgs {
                    reference: reference.clone(),
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

    /// The underlying transport. Exposed only under `test-utils` so
    /// integration tests can assert on connection reuse (§4.5) without
    /// widening this facade's default surface.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }
}
