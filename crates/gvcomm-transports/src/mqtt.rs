use std::sync::Arc;
use std::time::Duration;

use gvcomm::device::DeviceInfo;
use gvcomm::error::{Error, ErrorKind, Result};
use gvcomm::transport::{Message, Transport, TransportListener};

use rumqttc::Outgoing;
use rumqttc::v5::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions,
    mqttbytes::v5::{Packet, Publish},
};

pub use rumqttc::v5::mqttbytes::QoS;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::{Credentials, Listeners};

// The capacity of the bounded channel of client requests.
const REQUESTS_CAPACITY: usize = 10;

// Pause before the event loop retries after a connection error.
const RECONNECTION_DELAY: Duration = Duration::from_secs(1);

// Maximum time to wait for the event loop to flush a disconnection.
const DISCONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration of an [`MqttTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    server: String,
    port: u16,
    credentials: Option<Credentials>,
    clean_session: bool,
    keep_alive: Duration,
    connect_timeout: Duration,
    qos: QoS,
    retain: bool,
    inbound_capacity: usize,
}

impl MqttConfig {
    /// Creates an [`MqttConfig`] for the broker at the given address.
    ///
    /// Defaults:
    ///
    /// - no credentials
    /// - clean session
    /// - 5 seconds of keep alive
    /// - 5 seconds of connection timeout
    /// - [`QoS::AtMostOnce`] without retain
    /// - an inbound buffer of 32 messages
    #[must_use]
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            credentials: None,
            clean_session: true,
            keep_alive: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            qos: QoS::AtMostOnce,
            retain: false,
            inbound_capacity: 32,
        }
    }

    /// Sets the [`Credentials`].
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets whether the broker must discard the previous session state.
    #[must_use]
    pub const fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    /// Sets the keep alive interval.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the maximum time to wait for the broker acknowledgment.
    #[must_use]
    pub const fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the quality of service of publications and subscriptions.
    #[must_use]
    pub const fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Sets whether the broker must retain publications.
    #[must_use]
    pub const fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Sets the number of inbound messages buffered between two polls.
    ///
    /// When the buffer is full, further inbound messages are dropped.
    #[must_use]
    pub const fn inbound_capacity(mut self, inbound_capacity: usize) -> Self {
        self.inbound_capacity = inbound_capacity;
        self
    }

    /// Returns the broker address.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the broker port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug)]
struct Session {
    client: AsyncClient,
    inbound: flume::Receiver<Message>,
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A [`Transport`] over `MQTT`.
///
/// The `MQTT` client identifier is the device identifier.
///
/// Network traffic is handled by a task running on an internal `tokio`
/// runtime. Incoming publications are buffered until
/// [`Transport::poll`] retrieves them, so polling never blocks.
///
/// Registered [`TransportListener`]s are notified from the caller thread for
/// requested operations, and from the runtime thread when the connection is
/// lost or restored.
///
/// Since it owns a runtime, an [`MqttTransport`] must not be used from
/// within an asynchronous context.
#[derive(Debug)]
pub struct MqttTransport {
    client_id: String,
    config: MqttConfig,
    runtime: Runtime,
    listeners: Listeners,
    session: Option<Session>,
}

impl MqttTransport {
    /// Creates an [`MqttTransport`] for the given device.
    ///
    /// No connection is opened until [`Transport::connect`] is called.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Connection`] error if the internal runtime cannot be
    /// started.
    pub fn new(device: &DeviceInfo, config: MqttConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gvcomm-mqtt")
            .enable_all()
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorKind::Connection,
                    format!("Impossible to start the MQTT runtime: {e}"),
                )
            })?;

        Ok(Self {
            client_id: device.id().into(),
            config,
            runtime,
            listeners: Listeners::default(),
            session: None,
        })
    }

    /// Registers a [`TransportListener`].
    ///
    /// A listener registered while connected only receives the events of
    /// the background task from the next connection on.
    pub fn add_listener(&mut self, listener: Arc<dyn TransportListener>) {
        self.listeners.add(listener);
    }

    /// Publishes a payload with the given quality of service and retain
    /// flag, instead of the ones of the [`MqttConfig`].
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotConnected`] without a session
    /// - [`ErrorKind::SendFailure`] if the request cannot be queued
    pub fn publish(
        &mut self,
        channel: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        let session = self.session()?;

        session
            .client
            .try_publish(channel, qos, retain, payload.to_vec())
            .map_err(|e| client_error(ErrorKind::SendFailure, channel, &e))
    }

    /// Returns the [`MqttConfig`].
    #[must_use]
    pub const fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Checks whether a session is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::NotConnected,
                format!("Client `{}` is not connected", self.client_id),
            )
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.as_str(),
            self.config.server.as_str(),
            self.config.port,
        );
        let _ = options
            .set_keep_alive(self.config.keep_alive)
            .set_clean_start(self.config.clean_session);

        if let Some(credentials) = &self.config.credentials {
            let _ = options.set_credentials(
                credentials.username().to_owned(),
                credentials.password().to_owned(),
            );
        }

        options
    }
}

fn client_error(kind: ErrorKind, channel: &str, e: &ClientError) -> Error {
    Error::new(kind, format!("Request on `{channel}` failed: {e}"))
}

#[inline]
fn forward_publish(inbound: &flume::Sender<Message>, publish: &Publish) {
    let Ok(channel) = std::str::from_utf8(&publish.topic) else {
        warn!("Discarding a publication with a non UTF-8 topic");
        return;
    };

    match inbound.try_send(Message::new(channel, publish.payload.to_vec())) {
        Ok(()) => {}
        Err(flume::TrySendError::Full(message)) => {
            warn!(
                "Inbound buffer full, discarding the message on `{}`",
                message.channel
            );
        }
        Err(flume::TrySendError::Disconnected(message)) => {
            debug!(
                "Nobody is polling, discarding the message on `{}`",
                message.channel
            );
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    cancellation_token: CancellationToken,
    connack: flume::Sender<std::result::Result<(), String>>,
    inbound: flume::Sender<Message>,
    listeners: Listeners,
) {
    let mut acknowledged = false;
    let mut lost = false;
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if !acknowledged {
                        acknowledged = true;
                        let _ = connack.try_send(Ok(()));
                    } else if lost {
                        lost = false;
                        warn!("Reconnected to the broker, subscriptions may be lost");
                        listeners.notify(|listener| listener.on_connect());
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    forward_publish(&inbound, &publish);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => { break; }
                Ok(_) => {}
                Err(e) if !acknowledged => {
                    let _ = connack.try_send(Err(e.to_string()));
                    break;
                }
                Err(e) => {
                    if !lost {
                        lost = true;
                        let reason = Error::new(
                            ErrorKind::Connection,
                            format!("Connection lost: {e}"),
                        );
                        listeners.notify(|listener| listener.on_connection_lost(&reason));
                    }
                    error!("Connection error, retrying: {e}");
                    tokio::time::sleep(RECONNECTION_DELAY).await;
                }
            }
        }
    }
    drop(inbound);
    drop(eventloop);
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (client, eventloop) = AsyncClient::new(self.options(), REQUESTS_CAPACITY);
        let (inbound_sender, inbound) = flume::bounded(self.config.inbound_capacity);
        let (connack_sender, connack) = flume::bounded(1);
        let cancellation_token = CancellationToken::new();

        let handle = self.runtime.spawn(run_event_loop(
            eventloop,
            cancellation_token.clone(),
            connack_sender,
            inbound_sender,
            self.listeners.clone(),
        ));

        let outcome = match connack.recv_timeout(self.config.connect_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("connection refused: {e}")),
            Err(_) => Err(format!(
                "no acknowledgment within {:?}",
                self.config.connect_timeout
            )),
        };

        if let Err(reason) = outcome {
            cancellation_token.cancel();
            let error = Error::new(
                ErrorKind::Connection,
                format!(
                    "Impossible to connect to {}:{}, {reason}",
                    self.config.server, self.config.port
                ),
            );
            self.listeners.notify(|listener| listener.on_connection_failed(&error));
            return Err(error);
        }

        info!(
            "Client `{}` connected to {}:{}",
            self.client_id, self.config.server, self.config.port
        );

        self.session = Some(Session {
            client,
            inbound,
            cancellation_token,
            handle,
        });
        self.listeners.notify(|listener| listener.on_connect());

        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        self.listeners.notify(|listener| listener.on_disconnect());

        let result = session.client.try_disconnect().map_err(|e| {
            Error::new(
                ErrorKind::Connection,
                format!("Impossible to disconnect cleanly: {e}"),
            )
        });

        if result.is_ok()
            && self
                .runtime
                .block_on(tokio::time::timeout(DISCONNECTION_TIMEOUT, session.handle))
                .is_err()
        {
            warn!("The event loop did not stop within {DISCONNECTION_TIMEOUT:?}");
        }

        session.cancellation_token.cancel();
        info!("Client `{}` disconnected", self.client_id);

        result
    }

    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        self.publish(channel, payload, self.config.qos, self.config.retain)
    }

    fn poll(&mut self) -> Option<Message> {
        self.session.as_ref()?.inbound.try_recv().ok()
    }

    fn subscribe(&mut self, channel: &str) -> Result<()> {
        let session = self.session()?;

        session
            .client
            .try_subscribe(channel, self.config.qos)
            .map_err(|e| client_error(ErrorKind::Subscription, channel, &e))?;

        debug!("Subscribed to `{channel}`");
        self.listeners.notify(|listener| listener.on_subscribe(channel));
        Ok(())
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let session = self.session()?;

        self.listeners.notify(|listener| listener.on_unsubscribe(channel));
        session
            .client
            .try_unsubscribe(channel)
            .map_err(|e| client_error(ErrorKind::Subscription, channel, &e))?;

        debug!("Unsubscribed from `{channel}`");
        Ok(())
    }
}
