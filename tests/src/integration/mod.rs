//! Cross-component scenarios over a fully wired `FabricGateway`.

pub mod circuit_breaker;
pub mod connection;
pub mod identity;
pub mod submission;

use ibn_fabric_gateway::testing::{mock_gateway, MockPeer};
use ibn_fabric_gateway::{FabricGateway, InvokeRequest};

/// Started gateway over a healthy in-memory peer.
pub async fn started_gateway() -> (MockPeer, FabricGateway) {
    let peer = MockPeer::healthy();
    let gateway = mock_gateway(&peer);
    gateway.start().await.expect("gateway start");
    (peer, gateway)
}

/// `createBatch` on the default channel and chaincode.
pub fn create_batch(gateway: &FabricGateway, batch_id: &str) -> InvokeRequest {
    gateway
        .request("createBatch")
        .with_args([batch_id, "Farm Thai Nguyen", "Shan Tuyet", "2026-10-01"])
}
