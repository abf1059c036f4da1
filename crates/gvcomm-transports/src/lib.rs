//! The `gvcomm-transports` library crate provides concrete implementations
//! of the `gvcomm` [`Transport`](gvcomm::transport::Transport) trait.
//!
//! Available transports:
//!
//! - `MQTT`, enabled by the `mqtt` feature. The client runs on an internal
//!   `tokio` runtime, so the blocking and non-blocking contract of the
//!   trait holds regardless of how the application is structured.
//! - `REST`, enabled by the `rest` feature. It can only send: inbound
//!   delivery is not supported over plain `HTTP` requests.
//!
//! Both features are enabled by default. The `https` feature adds `TLS`
//! support to the `REST` transport.
//!
//! Each transport accepts [`TransportListener`]s which are notified of its
//! session events.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::fmt;
use std::sync::Arc;

use gvcomm::transport::TransportListener;

/// `MQTT` transport.
#[cfg(feature = "mqtt")]
pub mod mqtt;
/// `REST` transport.
#[cfg(feature = "rest")]
pub mod rest;

/// Credentials used to authenticate against a remote server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Creates [`Credentials`].
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

// The listeners registered on a transport.
#[derive(Clone, Default)]
pub(crate) struct Listeners(Vec<Arc<dyn TransportListener>>);

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listeners").field(&self.0.len()).finish()
    }
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Arc<dyn TransportListener>) {
        self.0.push(listener);
    }

    pub(crate) fn notify(&self, event: impl Fn(&dyn TransportListener)) {
        for listener in &self.0 {
            event(listener.as_ref());
        }
    }
}
