//! TLS dialer over TCP.
//!
//! Produces an authenticated TLS stream with ALPN `h2` negotiated. The stream
//! is parked in a [`TlsChannel`] until the RPC binding takes it to run HTTP/2;
//! the binding reports transport failures back through
//! [`TlsChannel::mark_failed`] so the health probe can see them.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::domain::error::{RpcError, StatusCode};
use crate::domain::types::ChannelState;
use crate::ports::outbound::{DialTarget, Dialer, PeerChannel};

#[derive(Debug, Clone, Copy, Default)]
pub struct TlsDialer;

impl TlsDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn PeerChannel>, RpcError> {
        let tcp = TcpStream::connect(&target.endpoint)
            .await
            .map_err(|e| RpcError::unavailable(format!("tcp connect to {}: {e}", target.endpoint)))?;
        tcp.set_nodelay(true)
            .map_err(|e| RpcError::unavailable(format!("set_nodelay: {e}")))?;

        let connector = TlsConnector::from(target.credentials.client_config());
        let stream = connector
            .connect(target.credentials.server_name().clone(), tcp)
            .await
            .map_err(|e| {
                let code = if e.kind() == std::io::ErrorKind::InvalidData {
                    StatusCode::Unauthenticated
                } else {
                    StatusCode::Unavailable
                };
                RpcError::new(code, format!("TLS handshake with {} failed: {e}", target.endpoint))
            })?;

        let alpn = stream
            .get_ref()
            .1
            .alpn_protocol()
            .map(|protocol| String::from_utf8_lossy(protocol).into_owned());
        info!(
            endpoint = %target.endpoint,
            mode = ?target.credentials.mode(),
            alpn = ?alpn,
            "TLS channel established"
        );

        Ok(Arc::new(TlsChannel::new(target.endpoint.clone(), stream)))
    }
}

/// An established TLS connection to one peer.
pub struct TlsChannel {
    endpoint: String,
    state: watch::Sender<ChannelState>,
    stream: Mutex<Option<TlsStream<TcpStream>>>,
    alpn: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsChannel")
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl TlsChannel {
    fn new(endpoint: String, stream: TlsStream<TcpStream>) -> Self {
        let alpn = stream.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
        let (state, _) = watch::channel(ChannelState::Ready);
        Self {
            endpoint,
            state,
            stream: Mutex::new(Some(stream)),
            alpn,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Protocol selected by ALPN, if any.
    pub fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    /// Hand the stream to the RPC binding. Returns `None` once taken or closed.
    pub fn take_stream(&self) -> Option<TlsStream<TcpStream>> {
        self.stream.lock().take()
    }

    /// Report a broken transport.
    pub fn mark_failed(&self) {
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Shutdown || *state == ChannelState::TransientFailure {
                return false;
            }
            *state = ChannelState::TransientFailure;
            true
        });
    }

    /// Report that the binding has no calls in flight.
    pub fn mark_idle(&self) {
        self.state.send_if_modified(|state| {
            if *state != ChannelState::Ready {
                return false;
            }
            *state = ChannelState::Idle;
            true
        });
    }
}

#[async_trait]
impl PeerChannel for TlsChannel {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    async fn wait_for_state_change(&self, from: ChannelState) {
        let mut changes = self.state.subscribe();
        let _ = changes.wait_for(|state| *state != from).await;
    }

    fn close(&self) {
        let stream = self.stream.lock().take();
        let previous = self.state.send_replace(ChannelState::Shutdown);
        if previous != ChannelState::Shutdown {
            debug!(endpoint = %self.endpoint, had_stream = stream.is_some(), "TLS channel closed");
        }
    }
}
