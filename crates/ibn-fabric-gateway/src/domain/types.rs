//! Core value types shared by the connection, gateway and orchestration layers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Lifecycle of the managed peer connection.
///
/// ```text
/// Disconnected ──connect──► Connecting ──ok──► Ready ──probe fails──► Degraded
///      ▲                        │                                       │
///      └──── attempts exhausted ┘◄──────────── reconnect ───────────────┘
///
/// any state ──close──► ShuttingDown (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    ShuttingDown,
}

impl ConnectionState {
    /// Numeric encoding for the state gauge.
    pub fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Degraded => 3,
            ConnectionState::ShuttingDown => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Degraded => write!(f, "degraded"),
            ConnectionState::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}

/// Transport-level condition reported by an RPC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ChannelState {
    /// Idle and Ready channels can carry calls; Connecting is treated as usable
    /// because the first call completes the handshake.
    pub fn is_usable(self) -> bool {
        !matches!(self, ChannelState::TransientFailure | ChannelState::Shutdown)
    }

    /// Whether the channel finished connecting.
    pub fn is_live(self) -> bool {
        matches!(self, ChannelState::Ready | ChannelState::Idle)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "IDLE"),
            ChannelState::Connecting => write!(f, "CONNECTING"),
            ChannelState::Ready => write!(f, "READY"),
            ChannelState::TransientFailure => write!(f, "TRANSIENT_FAILURE"),
            ChannelState::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// One observation made by the background health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    /// Channel state read by the probe (`None` when no channel was installed)
    pub observed_state: Option<ChannelState>,
    /// Manager state at the time of the probe
    pub connection_state: ConnectionState,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// REQUESTS AND PROPOSALS
// =============================================================================

/// A request to invoke or evaluate a chaincode function.
///
/// Transient values are base64 encoded, as they arrive from the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub channel: String,
    pub chaincode: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub transient_data: BTreeMap<String, String>,
    #[serde(default)]
    pub endorsing_orgs: Vec<String>,
}

impl InvokeRequest {
    pub fn new(
        channel: impl Into<String>,
        chaincode: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chaincode: chaincode.into(),
            function: function.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a base64 encoded transient value.
    pub fn with_transient(mut self, key: impl Into<String>, encoded: impl Into<String>) -> Self {
        self.transient_data.insert(key.into(), encoded.into());
        self
    }

    pub fn with_endorsing_orgs<I, S>(mut self, orgs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endorsing_orgs = orgs.into_iter().map(Into::into).collect();
        self
    }
}

/// A transaction proposal built locally before endorsement.
///
/// Signing and wire serialization are left to the gateway binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub transaction_id: String,
    pub nonce: Vec<u8>,
    /// Serialized creator (MSP ID and certificate) the transaction ID is bound to
    pub creator: Vec<u8>,
    pub channel: String,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<Vec<u8>>,
    /// Decoded private data, never written to the ledger
    pub transient: BTreeMap<String, Vec<u8>>,
    pub endorsing_orgs: Vec<String>,
}

/// Chaincode response captured at endorsement time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalResult {
    pub payload: Vec<u8>,
}

/// An endorsed transaction ready to be sent to the ordering service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsedTransaction {
    pub transaction_id: String,
    pub result: ProposalResult,
}

/// Fabric validation code for a valid transaction.
pub const TX_VALIDATION_VALID: i32 = 0;

/// Commit status reported by the peer after ordering and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStatus {
    pub block_number: u64,
    pub validation_code: i32,
}

impl CommitStatus {
    pub fn is_successful(&self) -> bool {
        self.validation_code == TX_VALIDATION_VALID
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Terminal result of a submitted transaction.
///
/// `committed_successfully == false` means the transaction was ordered but
/// rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    transaction_id: String,
    block_number: u64,
    committed_successfully: bool,
    raw_result: Vec<u8>,
    committed_at: DateTime<Utc>,
}

impl TransactionOutcome {
    pub fn new(
        transaction_id: String,
        block_number: u64,
        committed_successfully: bool,
        raw_result: Vec<u8>,
    ) -> Self {
        Self {
            transaction_id,
            block_number,
            committed_successfully,
            raw_result,
            committed_at: Utc::now(),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn committed_successfully(&self) -> bool {
        self.committed_successfully
    }

    pub fn raw_result(&self) -> &[u8] {
        &self.raw_result
    }

    /// Response body for the HTTP layer.
    ///
    /// The chaincode result is embedded as JSON when it parses, otherwise as a
    /// string.
    pub fn to_response(&self) -> InvokeResponse {
        let result = if self.raw_result.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&self.raw_result).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&self.raw_result).into_owned())
            })
        };

        InvokeResponse {
            transaction_id: self.transaction_id.clone(),
            block_number: self.block_number,
            status: if self.committed_successfully {
                TxStatus::Valid
            } else {
                TxStatus::Invalid
            },
            result,
            timestamp: self.committed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Valid,
    Invalid,
}

/// Serializable view of a [`TransactionOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub transaction_id: String,
    pub block_number: u64,
    pub status: TxStatus,
    pub result: serde_json::Value,
    pub timestamp: String,
}

/// Channel height information from the query system chaincode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel_id: String,
    /// Hex encoded `BlockchainInfo` protobuf, empty when unavailable
    pub raw_info: String,
    pub size: usize,
}

impl ChannelInfo {
    pub fn unavailable(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            raw_info: String::new(),
            size: 0,
        }
    }
}
