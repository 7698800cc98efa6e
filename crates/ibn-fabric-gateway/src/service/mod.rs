//! # Fabric Gateway Service
//!
//! Wires credentials, connection, breaker, identity gateway and orchestrator
//! into one facade implementing [`TransactionApi`].
//!
//! ```text
//! FabricGateway::builder(config)
//!     .connector(binding)          // required: signs and serializes proposals
//!     .dialer(dialer)              // default: TlsDialer
//!     .operator_identity(id)       // default: loaded from credentials config
//!     .transport_credentials(tls)  // default: loaded from credentials config
//!     .build()?
//! ```

pub mod ledger;
pub mod orchestrator;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::adapters::tls::TlsDialer;
use crate::connection::{ConnectionManager, ConnectionSettings, HealthChecker, HealthStatus};
use crate::context::RequestContext;
use crate::credentials::{CredentialProvider, TransportCredentials};
use crate::domain::config::{ConfigError, GatewayConfig};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::identity::Identity;
use crate::domain::types::{InvokeRequest, TransactionOutcome};
use crate::gateway::IdentityGateway;
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitStats};
use crate::ports::inbound::TransactionApi;
use crate::ports::outbound::{DialTarget, Dialer, GatewayConnector};

pub use ledger::LedgerQueries;
pub use orchestrator::TransactionOrchestrator;

/// Builder for [`FabricGateway`]
pub struct FabricGatewayBuilder {
    config: GatewayConfig,
    dialer: Option<Arc<dyn Dialer>>,
    connector: Option<Arc<dyn GatewayConnector>>,
    operator: Option<Identity>,
    transport: Option<TransportCredentials>,
}

impl FabricGatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            dialer: None,
            connector: None,
            operator: None,
            transport: None,
        }
    }

    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn GatewayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn operator_identity(mut self, identity: Identity) -> Self {
        self.operator = Some(identity);
        self
    }

    pub fn transport_credentials(mut self, credentials: TransportCredentials) -> Self {
        self.transport = Some(credentials);
        self
    }

    /// Validate the configuration, load missing credentials and wire components.
    ///
    /// Does not dial; call [`FabricGateway::start`] for that.
    pub fn build(self) -> GatewayResult<FabricGateway> {
        let config = self.config;
        config.validate()?;

        let connector = self
            .connector
            .ok_or(ConfigError::MissingComponent("gateway connector"))?;
        let provider = CredentialProvider::from_config(&config);
        let transport = match self.transport {
            Some(transport) => transport,
            None => provider.load_transport_credentials()?,
        };
        let operator = match self.operator {
            Some(identity) => identity,
            None => provider.load_operator_identity()?,
        };
        let dialer = self.dialer.unwrap_or_else(|| Arc::new(TlsDialer::new()));

        let msp_id = operator.msp_id().to_string();
        let target = DialTarget::new(
            config.peer.endpoint.clone(),
            transport,
            config.channel.clone(),
        );
        let connection =
            ConnectionManager::new(target, dialer, ConnectionSettings::from_config(&config));
        let health = HealthChecker::new(connection.clone(), msp_id, config.health.poll_interval);
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let gateway = Arc::new(IdentityGateway::new(
            connection.clone(),
            connector,
            provider,
            operator,
            config.timeouts,
        ));
        let orchestrator = Arc::new(TransactionOrchestrator::new(
            Arc::clone(&gateway),
            Arc::clone(&breaker),
            config.timeouts,
        ));

        Ok(FabricGateway {
            config,
            connection,
            health,
            breaker,
            gateway,
            orchestrator,
        })
    }
}

/// Resilient transaction submission against one Fabric peer.
pub struct FabricGateway {
    config: GatewayConfig,
    connection: ConnectionManager,
    health: HealthChecker,
    breaker: Arc<CircuitBreaker>,
    gateway: Arc<IdentityGateway>,
    orchestrator: Arc<TransactionOrchestrator>,
}

impl std::fmt::Debug for FabricGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricGateway")
            .field("connection", &self.connection)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl FabricGateway {
    pub fn builder(config: GatewayConfig) -> FabricGatewayBuilder {
        FabricGatewayBuilder::new(config)
    }

    /// Connect and wait until the peer reports healthy.
    pub async fn start(&self) -> GatewayResult<HealthStatus> {
        info!(
            endpoint = %self.config.peer.endpoint,
            channel = %self.config.peer.channel,
            chaincode = %self.config.peer.chaincode,
            msp_id = %self.gateway.operator().msp_id(),
            "Starting Fabric gateway"
        );
        self.connection.connect().await?;
        self.health
            .wait_for_healthy(self.config.health.startup_timeout)
            .await
    }

    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        request: &InvokeRequest,
    ) -> GatewayResult<TransactionOutcome> {
        self.orchestrator.invoke(ctx, request).await
    }

    pub async fn evaluate(&self, ctx: &RequestContext, request: &InvokeRequest) -> GatewayResult<Vec<u8>> {
        self.orchestrator.evaluate(ctx, request).await
    }

    /// Connection state plus the default contract's channel name.
    pub async fn health(&self) -> GatewayResult<()> {
        let channel = self.connection.get_connection()?;
        let state = channel.state();
        if !state.is_live() {
            return Err(GatewayError::NotConnected {
                state: self.connection.state(),
            });
        }

        let lease = self
            .gateway
            .get_contract(None, &self.config.peer.channel, &self.config.peer.chaincode)
            .await?;
        if lease.contract().channel_name() != self.config.peer.channel {
            return Err(GatewayError::NotConnected {
                state: self.connection.state(),
            });
        }
        Ok(())
    }

    pub fn check_health(&self) -> HealthStatus {
        self.health.check_health()
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.health
    }

    pub fn ledger(&self) -> LedgerQueries {
        LedgerQueries::new(Arc::clone(&self.orchestrator))
    }

    pub fn breaker_stats(&self) -> CircuitStats {
        self.breaker.stats()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Default invoke request for the configured channel and chaincode.
    pub fn request(&self, function: impl Into<String>) -> InvokeRequest {
        InvokeRequest::new(
            self.config.peer.channel.clone(),
            self.config.peer.chaincode.clone(),
            function,
        )
    }

    /// Close the operator session and the managed connection.
    pub async fn close(&self) {
        self.gateway.close().await;
        self.connection.close();
        info!(endpoint = %self.config.peer.endpoint, "Fabric gateway closed");
    }
}

#[async_trait]
impl TransactionApi for FabricGateway {
    async fn invoke(
        &self,
        ctx: &RequestContext,
        request: &InvokeRequest,
    ) -> GatewayResult<TransactionOutcome> {
        FabricGateway::invoke(self, ctx, request).await
    }

    async fn evaluate(&self, ctx: &RequestContext, request: &InvokeRequest) -> GatewayResult<Vec<u8>> {
        FabricGateway::evaluate(self, ctx, request).await
    }

    async fn health(&self) -> GatewayResult<()> {
        FabricGateway::health(self).await
    }
}
