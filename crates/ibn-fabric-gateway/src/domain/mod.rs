//! Domain layer: configuration, errors, identities and value types.

pub mod config;
pub mod error;
pub mod identity;
pub mod retry;
pub mod types;

pub use config::{
    ChannelOptions, ConfigError, CredentialsConfig, GatewayConfig, HealthConfig, PeerConfig,
    TimeoutConfig,
};
pub use error::{ErrorClass, GatewayError, GatewayResult, RpcError, StatusCode};
pub use identity::{ForwardedIdentity, Identity};
pub use retry::RetryPolicy;
pub use types::*;
