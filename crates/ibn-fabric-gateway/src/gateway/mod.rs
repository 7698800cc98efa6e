//! Identity-scoped gateway.
//!
//! Without a forwarded identity, contracts come from one long-lived operator
//! session bound to the managed channel. The session is rebuilt whenever the
//! connection manager installs a new channel.
//!
//! A forwarded identity gets a dedicated channel and session. Both are owned
//! by the returned [`ContractLease`] and closed exactly once when the lease is
//! released or dropped, on every exit path including cancellation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::connection::{establish_channel, ConnectionManager};
use crate::credentials::CredentialProvider;
use crate::domain::config::TimeoutConfig;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::identity::{ForwardedIdentity, Identity};
use crate::metrics;
use crate::ports::outbound::{ContractHandle, GatewayConnector, GatewaySession, PeerChannel};

struct OperatorSession {
    /// Channel epoch the session was bound to
    epoch: u64,
    session: Arc<dyn GatewaySession>,
}

/// Hands out contract handles for the operator or a forwarded identity.
pub struct IdentityGateway {
    connection: ConnectionManager,
    connector: Arc<dyn GatewayConnector>,
    credentials: CredentialProvider,
    operator: Arc<Identity>,
    timeouts: TimeoutConfig,
    operator_session: tokio::sync::Mutex<Option<OperatorSession>>,
}

impl std::fmt::Debug for IdentityGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGateway")
            .field("endpoint", &self.connection.endpoint())
            .field("operator", &self.operator.msp_id())
            .finish()
    }
}

impl IdentityGateway {
    pub fn new(
        connection: ConnectionManager,
        connector: Arc<dyn GatewayConnector>,
        credentials: CredentialProvider,
        operator: Identity,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            connection,
            connector,
            credentials,
            operator: Arc::new(operator),
            timeouts,
            operator_session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn operator(&self) -> &Identity {
        &self.operator
    }

    /// Contract handle for `identity`, or for the operator when `None`.
    pub async fn get_contract(
        &self,
        identity: Option<&ForwardedIdentity>,
        channel: &str,
        chaincode: &str,
    ) -> GatewayResult<ContractLease> {
        match identity {
            None => self.operator_contract(channel, chaincode).await,
            Some(forwarded) => self.forwarded_contract(forwarded, channel, chaincode).await,
        }
    }

    async fn operator_contract(&self, channel: &str, chaincode: &str) -> GatewayResult<ContractLease> {
        let (epoch, peer_channel) = match self.connection.current_channel() {
            Ok(current) => current,
            Err(GatewayError::NotConnected { .. }) => {
                self.connection.connect().await?;
                self.connection.current_channel()?
            }
            Err(e) => return Err(e),
        };

        let session = {
            let mut cached = self.operator_session.lock().await;
            match cached.as_ref() {
                Some(current) if current.epoch == epoch => Arc::clone(&current.session),
                _ => {
                    let session = self
                        .connector
                        .connect(peer_channel, Arc::clone(&self.operator), &self.timeouts)
                        .await
                        .map_err(|source| GatewayError::DialFailed {
                            endpoint: self.connection.endpoint().to_string(),
                            source,
                        })?;
                    debug!(epoch, msp_id = %self.operator.msp_id(), "Bound operator gateway to channel");
                    if let Some(stale) = cached.replace(OperatorSession {
                        epoch,
                        session: Arc::clone(&session),
                    }) {
                        stale.session.close();
                    }
                    session
                }
            }
        };

        Ok(ContractLease {
            contract: session.contract(channel, chaincode),
            identity: Arc::clone(&self.operator),
            resources: None,
        })
    }

    async fn forwarded_contract(
        &self,
        forwarded: &ForwardedIdentity,
        channel: &str,
        chaincode: &str,
    ) -> GatewayResult<ContractLease> {
        self.connection.ensure_open()?;
        let identity = Arc::new(self.credentials.verify_forwarded(forwarded)?);
        let endpoint = self.connection.endpoint().to_string();
        let settings = self.connection.settings();

        let peer_channel = establish_channel(
            self.connection.dialer().as_ref(),
            self.connection.target(),
            settings.dial_timeout,
            settings.ready_timeout,
        )
        .await
        .map_err(|source| GatewayError::DialFailed {
            endpoint: endpoint.clone(),
            source,
        })?;
        // Owned from here on; dropping closes the channel
        let mut resources = ForwardedResources::new(Arc::clone(&peer_channel), identity.msp_id());

        let session = self
            .connector
            .connect(peer_channel, Arc::clone(&identity), &self.timeouts)
            .await
            .map_err(|source| GatewayError::DialFailed { endpoint, source })?;
        resources.session = Some(Arc::clone(&session));

        Ok(ContractLease {
            contract: session.contract(channel, chaincode),
            identity,
            resources: Some(resources),
        })
    }

    /// Close the operator session. The managed channel is left to its manager.
    pub async fn close(&self) {
        if let Some(current) = self.operator_session.lock().await.take() {
            current.session.close();
        }
    }
}

/// Dedicated channel and session of one forwarded call.
struct ForwardedResources {
    channel: Arc<dyn PeerChannel>,
    session: Option<Arc<dyn GatewaySession>>,
    msp_id: String,
}

impl ForwardedResources {
    fn new(channel: Arc<dyn PeerChannel>, msp_id: &str) -> Self {
        metrics::forwarded_gateway_opened();
        info!(msp_id, "Opened forwarded-identity gateway");
        Self {
            channel,
            session: None,
            msp_id: msp_id.to_string(),
        }
    }
}

impl Drop for ForwardedResources {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.channel.close();
        metrics::forwarded_gateway_closed();
        info!(msp_id = %self.msp_id, "Closed forwarded-identity gateway");
    }
}

/// A contract handle plus whatever must be released with it.
///
/// Operator leases own nothing. Forwarded leases close their session and
/// channel on [`release`](ContractLease::release) or drop.
pub struct ContractLease {
    contract: Arc<dyn ContractHandle>,
    identity: Arc<Identity>,
    resources: Option<ForwardedResources>,
}

impl std::fmt::Debug for ContractLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractLease")
            .field("channel", &self.contract.channel_name())
            .field("chaincode", &self.contract.chaincode_name())
            .field("forwarded", &self.is_forwarded())
            .finish()
    }
}

impl ContractLease {
    pub fn contract(&self) -> &dyn ContractHandle {
        self.contract.as_ref()
    }

    /// Identity proposals are built for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_forwarded(&self) -> bool {
        self.resources.is_some()
    }

    /// Release dedicated resources now.
    pub fn release(self) {
        drop(self);
    }
}
