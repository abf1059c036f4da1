//! A communication library for constrained IoT nodes.
//!
//! This crate provides APIs to:
//!
//! - Announce a node, its sensors and its actuators to a remote party,
//!   typically an IoT platform reachable through a message broker.
//! - Publish sensor readings.
//! - Receive commands addressed to the node or to one of its actuators and
//!   dispatch them to the callbacks registered by the application.
//!
//! The library is split into three independent concerns:
//!
//! - A [`transport::Transport`] moves raw payloads addressed by channel
//!   over some medium, for example an `MQTT` broker.
//! - A [`protocol::Protocol`] defines the channels naming scheme and the
//!   payloads format.
//! - A [`registry::Registry`] keeps the sensors and actuators attached to
//!   the node.
//!
//! The [`comm::GvComm`] structure ties them together and drives the
//! lifecycle of a node: connection, announcements, data exchange and
//! shutdown. Dispatching is synchronous: the application periodically calls
//! [`comm::GvComm::poll`] and each call delivers at most one inbound message.
//!
//! Concrete transports live in the `gvcomm-transports` crate.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

/// Lifecycle orchestration of a node.
pub mod comm;
/// Identity of a node.
pub mod device;
/// Error handling.
pub mod error;
/// Channels naming scheme and payloads format.
pub mod protocol;
/// Sensors and actuators attached to a node.
pub mod registry;
/// Channel-addressed message transport.
pub mod transport;

#[cfg(test)]
mod tests;
