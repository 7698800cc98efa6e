//! In-memory peer and fixtures for tests.
//!
//! [`MockPeer`] implements both [`Dialer`] and [`GatewayConnector`], so a
//! single clone can stand in for the TLS transport and the gateway binding.
//! Behaviour is programmable per call kind and every network call is counted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::RootCertStore;
use tokio::sync::watch;

use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::credentials::{CredentialProvider, TransportCredentials};
use crate::domain::config::{ChannelOptions, CredentialsConfig, GatewayConfig, PeerConfig};
use crate::domain::error::RpcError;
use crate::domain::identity::{ForwardedIdentity, Identity};
use crate::domain::retry::RetryPolicy;
use crate::domain::types::{
    ChannelState, CommitStatus, EndorsedTransaction, Proposal, ProposalResult, TX_VALIDATION_VALID,
};
use crate::gateway::IdentityGateway;
use crate::ports::outbound::{
    ContractHandle, DialTarget, Dialer, GatewayConnector, GatewaySession, PeerChannel,
};
use crate::service::{FabricGateway, FabricGatewayBuilder};

/// Programmed reply of one remote call kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Succeed,
    Fail(RpcError),
    /// Never completes
    Hang,
}

impl Reply {
    async fn resolve(self) -> Result<(), RpcError> {
        match self {
            Reply::Succeed => Ok(()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => futures::future::pending::<Result<(), RpcError>>().await,
        }
    }
}

#[derive(Debug, Clone)]
struct Behaviour {
    dial_delay: Option<Duration>,
    initial_channel_state: ChannelState,
    connect_delay: Option<Duration>,
    connect_failure: Option<RpcError>,
    endorse: Reply,
    endorse_payload: Vec<u8>,
    submit: Reply,
    commit: Reply,
    validation_code: i32,
    evaluate: Reply,
    evaluate_responses: BTreeMap<String, Vec<u8>>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            dial_delay: None,
            initial_channel_state: ChannelState::Ready,
            connect_delay: None,
            connect_failure: None,
            endorse: Reply::Succeed,
            endorse_payload: Vec::new(),
            submit: Reply::Succeed,
            commit: Reply::Succeed,
            validation_code: TX_VALIDATION_VALID,
            evaluate: Reply::Succeed,
            evaluate_responses: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct PeerState {
    behaviour: Mutex<Behaviour>,
    dial_attempts: AtomicUsize,
    /// `u32::MAX` fails every dial
    dial_failures_left: AtomicU32,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    channels_closed: Arc<AtomicUsize>,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    session_identities: Mutex<Vec<String>>,
    network_calls: AtomicUsize,
    block_height: AtomicU64,
    proposals: Mutex<Vec<Proposal>>,
}

/// Programmable in-memory Fabric peer.
#[derive(Clone, Default)]
pub struct MockPeer {
    state: Arc<PeerState>,
}

impl std::fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeer")
            .field("dial_attempts", &self.dial_attempts())
            .field("network_calls", &self.network_calls())
            .finish()
    }
}

impl MockPeer {
    /// Accepts every dial and call.
    pub fn healthy() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Programming
    // -------------------------------------------------------------------------

    pub fn fail_first_dials(&self, n: u32) {
        self.state.dial_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_dials(&self) {
        self.state.dial_failures_left.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn heal_dials(&self) {
        self.state.dial_failures_left.store(0, Ordering::SeqCst);
    }

    pub fn set_dial_delay(&self, delay: Option<Duration>) {
        self.state.behaviour.lock().dial_delay = delay;
    }

    /// State new channels start in.
    pub fn set_initial_channel_state(&self, state: ChannelState) {
        self.state.behaviour.lock().initial_channel_state = state;
    }

    /// Make gateway session creation fail (`None` restores success).
    pub fn fail_connects(&self, failure: Option<RpcError>) {
        self.state.behaviour.lock().connect_failure = failure;
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state.behaviour.lock().connect_delay = delay;
    }

    pub fn set_endorse(&self, reply: Reply) {
        self.state.behaviour.lock().endorse = reply;
    }

    /// Chaincode result returned by endorsement.
    pub fn set_endorse_payload(&self, payload: impl Into<Vec<u8>>) {
        self.state.behaviour.lock().endorse_payload = payload.into();
    }

    pub fn set_submit(&self, reply: Reply) {
        self.state.behaviour.lock().submit = reply;
    }

    pub fn set_commit(&self, reply: Reply) {
        self.state.behaviour.lock().commit = reply;
    }

    /// Validation code reported by successful commit status calls.
    pub fn set_validation_code(&self, code: i32) {
        self.state.behaviour.lock().validation_code = code;
    }

    pub fn set_evaluate(&self, reply: Reply) {
        self.state.behaviour.lock().evaluate = reply;
    }

    /// Response returned when evaluating `function`; others return empty.
    pub fn set_evaluate_response(&self, function: &str, response: impl Into<Vec<u8>>) {
        self.state
            .behaviour
            .lock()
            .evaluate_responses
            .insert(function.to_string(), response.into());
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn dial_attempts(&self) -> usize {
        self.state.dial_attempts.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.state.channels_closed.load(Ordering::SeqCst)
    }

    /// Channels dialled and not yet closed.
    pub fn open_channels(&self) -> usize {
        self.state
            .channels
            .lock()
            .iter()
            .filter(|channel| !channel.is_closed())
            .count()
    }

    pub fn last_channel(&self) -> Option<Arc<MockChannel>> {
        self.state.channels.lock().last().cloned()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    /// MSP IDs gateway sessions were bound to, in order.
    pub fn session_identities(&self) -> Vec<String> {
        self.state.session_identities.lock().clone()
    }

    /// Evaluate, endorse, submit and commit-status calls received.
    pub fn network_calls(&self) -> usize {
        self.state.network_calls.load(Ordering::SeqCst)
    }

    pub fn block_height(&self) -> u64 {
        self.state.block_height.load(Ordering::SeqCst)
    }

    /// Proposals received by evaluate and endorse, in order.
    pub fn proposals(&self) -> Vec<Proposal> {
        self.state.proposals.lock().clone()
    }

    fn take_dial_failure(&self) -> bool {
        self.state
            .dial_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl Dialer for MockPeer {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn PeerChannel>, RpcError> {
        self.state.dial_attempts.fetch_add(1, Ordering::SeqCst);
        let (delay, initial) = {
            let behaviour = self.state.behaviour.lock();
            (behaviour.dial_delay, behaviour.initial_channel_state)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_dial_failure() {
            return Err(RpcError::unavailable(format!(
                "connection refused: {}",
                target.endpoint
            )));
        }

        let channel = Arc::new(MockChannel::new(
            initial,
            Arc::clone(&self.state.channels_closed),
        ));
        self.state.channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }
}

#[async_trait]
impl GatewayConnector for MockPeer {
    async fn connect(
        &self,
        _channel: Arc<dyn PeerChannel>,
        identity: Arc<Identity>,
        _timeouts: &crate::domain::config::TimeoutConfig,
    ) -> Result<Arc<dyn GatewaySession>, RpcError> {
        let (delay, failure) = {
            let behaviour = self.state.behaviour.lock();
            (behaviour.connect_delay, behaviour.connect_failure.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.state
            .session_identities
            .lock()
            .push(identity.msp_id().to_string());
        Ok(Arc::new(MockSession {
            peer: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Channel whose state tests drive directly.
#[derive(Debug)]
pub struct MockChannel {
    state: watch::Sender<ChannelState>,
    closed: AtomicBool,
    closed_counter: Arc<AtomicUsize>,
}

impl MockChannel {
    fn new(initial: ChannelState, closed_counter: Arc<AtomicUsize>) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            closed: AtomicBool::new(false),
            closed_counter,
        }
    }

    pub fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerChannel for MockChannel {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    async fn wait_for_state_change(&self, from: ChannelState) {
        let mut changes = self.state.subscribe();
        let _ = changes.wait_for(|state| *state != from).await;
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
            self.state.send_replace(ChannelState::Shutdown);
        }
    }
}

struct MockSession {
    peer: MockPeer,
    closed: AtomicBool,
}

impl GatewaySession for MockSession {
    fn contract(&self, channel: &str, chaincode: &str) -> Arc<dyn ContractHandle> {
        Arc::new(MockContract {
            peer: self.peer.clone(),
            channel: channel.to_string(),
            chaincode: chaincode.to_string(),
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.peer.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MockContract {
    peer: MockPeer,
    channel: String,
    chaincode: String,
}

impl MockContract {
    fn begin_call(&self) -> Behaviour {
        self.peer.state.network_calls.fetch_add(1, Ordering::SeqCst);
        self.peer.state.behaviour.lock().clone()
    }
}

#[async_trait]
impl ContractHandle for MockContract {
    fn channel_name(&self) -> &str {
        &self.channel
    }

    fn chaincode_name(&self) -> &str {
        &self.chaincode
    }

    async fn evaluate(&self, proposal: &Proposal) -> Result<Vec<u8>, RpcError> {
        let behaviour = self.begin_call();
        self.peer.state.proposals.lock().push(proposal.clone());
        behaviour.evaluate.resolve().await?;
        Ok(behaviour
            .evaluate_responses
            .get(&proposal.function)
            .cloned()
            .unwrap_or_default())
    }

    async fn endorse(&self, proposal: &Proposal) -> Result<EndorsedTransaction, RpcError> {
        let behaviour = self.begin_call();
        self.peer.state.proposals.lock().push(proposal.clone());
        behaviour.endorse.resolve().await?;
        Ok(EndorsedTransaction {
            transaction_id: proposal.transaction_id.clone(),
            result: ProposalResult {
                payload: behaviour.endorse_payload,
            },
        })
    }

    async fn submit(&self, _transaction: &EndorsedTransaction) -> Result<(), RpcError> {
        self.begin_call().submit.resolve().await
    }

    async fn commit_status(&self, _transaction_id: &str) -> Result<CommitStatus, RpcError> {
        let behaviour = self.begin_call();
        behaviour.commit.resolve().await?;
        let block_number = self.peer.state.block_height.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CommitStatus {
            block_number,
            validation_code: behaviour.validation_code,
        })
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

/// Self-signed certificate and key PEM for `name`.
pub fn self_signed_pem(name: &str) -> (String, String) {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec![name.to_string()]).expect("certificate generation");
    (cert.pem(), key_pair.serialize_pem())
}

/// Server-only TLS credentials trusting a throwaway root.
pub fn test_transport_credentials() -> TransportCredentials {
    let CertifiedKey { cert, .. } =
        generate_simple_self_signed(vec!["localhost".to_string()]).expect("certificate generation");
    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).expect("root certificate");
    TransportCredentials::server_only(roots, "localhost").expect("transport credentials")
}

pub fn test_identity(msp_id: &str) -> Identity {
    let (cert, key) = self_signed_pem("Admin@org1.ibn.vn");
    Identity::new(
        msp_id.to_string(),
        cert,
        key.into_bytes(),
        "Admin@org1.ibn.vn".to_string(),
    )
}

/// Parsable caller-supplied identity.
pub fn forwarded_identity(msp_id: &str) -> ForwardedIdentity {
    let (cert, key) = self_signed_pem("User1@org1.ibn.vn");
    ForwardedIdentity::new(msp_id, cert, key)
}

/// Configuration with short retry delays.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.peer.endpoint = "peer0.org1.ibn.vn:7051".to_string();
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        backoff_multiplier: 1.0,
        max_delay: Duration::from_secs(1),
    };
    config
}

pub fn test_manager(peer: &MockPeer) -> ConnectionManager {
    let config = test_config();
    let target = DialTarget::new(
        config.peer.endpoint.clone(),
        test_transport_credentials(),
        ChannelOptions::default(),
    );
    ConnectionManager::new(
        target,
        Arc::new(peer.clone()),
        ConnectionSettings::from_config(&config),
    )
}

/// Gateway over `peer` accepting `allowed_msps` (empty accepts any).
pub fn identity_gateway(peer: &MockPeer, allowed_msps: Vec<String>) -> IdentityGateway {
    let config = test_config();
    let credentials = CredentialProvider::new(
        CredentialsConfig::default(),
        PeerConfig {
            allowed_msps,
            ..config.peer.clone()
        },
    );
    IdentityGateway::new(
        test_manager(peer),
        Arc::new(peer.clone()),
        credentials,
        test_identity("Org1MSP"),
        config.timeouts,
    )
}

/// Builder wired to `peer` with test identity and transport.
pub fn mock_gateway_builder(peer: &MockPeer, config: GatewayConfig) -> FabricGatewayBuilder {
    FabricGateway::builder(config)
        .dialer(Arc::new(peer.clone()))
        .connector(Arc::new(peer.clone()))
        .operator_identity(test_identity("Org1MSP"))
        .transport_credentials(test_transport_credentials())
}

/// Fully wired gateway over `peer` using [`test_config`].
pub fn mock_gateway(peer: &MockPeer) -> FabricGateway {
    mock_gateway_builder(peer, test_config())
        .build()
        .expect("mock gateway")
}
