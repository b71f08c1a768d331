//! Transport seam for outbound mail.
//!
//! One blocking send against a relay, no retries at this layer. All
//! resilience lives in the delivery attempt controller; all composition
//! lives in the dispatcher. Hosts plug in a real SMTP implementation,
//! tests plug in fakes.

use async_trait::async_trait;

/// Coarse classification of a failed send. Drives operator diagnostics;
/// never changes retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Auth,
    Connection,
    Timeout,
    Unknown,
}

#[derive(thiserror::Error, Debug)]
#[error("{kind:?} transport failure: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Auth,
            message: message.into(),
        }
    }
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connection,
            message: message.into(),
        }
    }
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Unknown,
            message: message.into(),
        }
    }
}

/// Rendered message content. Opaque to the retry machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// A live connection to the relay. `&mut self` because the underlying
/// protocol is stateful; a connection is owned by exactly one delivery
/// job at a time.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, recipient: &str, message: &Message) -> Result<(), TransportError>;
}

/// Hands out fresh connections. After a failed attempt the controller
/// discards its connection and asks for a new one; stale connections are
/// assumed guilty.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Relay settings, passed in explicitly so tests can construct fakes and
/// hosts can source them however they like. The core never reads the
/// process environment.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

impl MailerConfig {
    pub fn new(relay_host: &str, relay_port: u16, from_address: &str) -> Self {
        Self {
            relay_host: relay_host.to_string(),
            relay_port,
            username: None,
            password: None,
            from_address: from_address.to_string(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }
}
