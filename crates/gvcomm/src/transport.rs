use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// A message addressed by a channel.
///
/// Outbound messages are produced by a [`crate::protocol::Protocol`], inbound
/// messages are produced by [`Transport::poll`] and consumed once by the
/// dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel, for example a publish/subscribe topic.
    pub channel: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a [`Message`].
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A medium capable of exchanging raw payloads addressed by channel.
///
/// An implementation **must not** connect on construction: the only way to
/// open a session is [`Transport::connect`].
pub trait Transport {
    /// Establishes the underlying session.
    ///
    /// Connecting an already connected transport is a no-op.
    ///
    /// # Errors
    ///
    /// A [`crate::error::ErrorKind::Connection`] error when the session
    /// cannot be established.
    fn connect(&mut self) -> Result<()>;

    /// Tears down the session.
    ///
    /// Disconnecting a transport which is not connected is a no-op.
    ///
    /// # Errors
    ///
    /// A [`crate::error::ErrorKind::Connection`] error when the session
    /// cannot be closed cleanly.
    fn disconnect(&mut self) -> Result<()>;

    /// Sends a payload on a channel.
    ///
    /// # Errors
    ///
    /// - [`crate::error::ErrorKind::NotConnected`] before
    ///   [`Transport::connect`]
    /// - [`crate::error::ErrorKind::SendFailure`] when the medium fails to
    ///   deliver the payload
    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Returns the next inbound [`Message`], if any.
    ///
    /// This method is invoked repeatedly in a tight loop: it must return
    /// immediately and perform a bounded amount of work.
    fn poll(&mut self) -> Option<Message>;

    /// Registers interest in the inbound messages of a channel.
    ///
    /// # Errors
    ///
    /// - [`crate::error::ErrorKind::NotConnected`] before
    ///   [`Transport::connect`]
    /// - [`crate::error::ErrorKind::Subscription`] when the medium refuses
    ///   the subscription
    fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Withdraws the interest in the inbound messages of a channel.
    ///
    /// # Errors
    ///
    /// A [`crate::error::ErrorKind::Subscription`] error when the medium
    /// refuses the request.
    fn unsubscribe(&mut self, _channel: &str) -> Result<()> {
        Ok(())
    }
}

/// An observer of the session events of a [`Transport`].
///
/// Every method does nothing by default, so an implementation only
/// overrides the events it cares about. Transports may notify listeners from
/// a background thread, hence the `Send + Sync` bound.
pub trait TransportListener: Send + Sync {
    /// Called after a session has been established, automatic
    /// reconnections included.
    fn on_connect(&self) {}

    /// Called after an attempt to establish a session failed.
    fn on_connection_failed(&self, _reason: &Error) {}

    /// Called before a session is torn down on request.
    fn on_disconnect(&self) {}

    /// Called after an established session has been lost.
    fn on_connection_lost(&self, _reason: &Error) {}

    /// Called after the subscription to a channel succeeded.
    fn on_subscribe(&self, _channel: &str) {}

    /// Called before the interest in a channel is withdrawn.
    fn on_unsubscribe(&self, _channel: &str) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    #[inline]
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    #[inline]
    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    #[inline]
    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        (**self).send(channel, payload)
    }

    #[inline]
    fn poll(&mut self) -> Option<Message> {
        (**self).poll()
    }

    #[inline]
    fn subscribe(&mut self, channel: &str) -> Result<()> {
        (**self).subscribe(channel)
    }

    #[inline]
    fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        (**self).unsubscribe(channel)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    #[inline]
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    #[inline]
    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    #[inline]
    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        (**self).send(channel, payload)
    }

    #[inline]
    fn poll(&mut self) -> Option<Message> {
        (**self).poll()
    }

    #[inline]
    fn subscribe(&mut self, channel: &str) -> Result<()> {
        (**self).subscribe(channel)
    }

    #[inline]
    fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        (**self).unsubscribe(channel)
    }
}
