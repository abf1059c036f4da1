use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use log::{debug, info, warn};

use serde::Serialize;

use crate::device::DeviceInfo;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{AnnounceKind, DeviceStatus, Direction, Entity, Protocol, ProtocolV1, Target};
use crate::registry::{Actuator, Callback, Descriptor, Entry, Registry};
use crate::transport::{Message, Transport};

/// Lifecycle states of a [`GvComm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Initial state, no session has been opened yet.
    Created,
    /// The transport session is open and the device channel is subscribed.
    Connected,
    /// Teardown is in progress.
    ShuttingDown,
    /// Terminal state.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => "Created",
            Self::Connected => "Connected",
            Self::ShuttingDown => "Shutting Down",
            Self::Closed => "Closed",
        }
        .fmt(f)
    }
}

/// Outcome of a [`GvComm::poll`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// No inbound message was available.
    Empty,
    /// An inbound message has been delivered to the callback of the
    /// given target.
    Dispatched(Target),
    /// An inbound message has been dropped because it could not be decoded
    /// or because nobody handles its target.
    Discarded,
}

#[inline]
fn send_message<T: Transport>(transport: &mut T, message: &Message) -> Result<()> {
    debug!(
        "Sending {} bytes on `{}`",
        message.payload.len(),
        message.channel
    );
    transport.send(&message.channel, &message.payload)
}

#[inline]
fn entity_of(entry: &Entry) -> Entity<'_> {
    match entry {
        Entry::Sensor(descriptor) => Entity::Sensor(descriptor),
        Entry::Actuator(actuator) => Entity::Actuator(actuator.descriptor()),
    }
}

/// The main entry point of the library.
///
/// A [`GvComm`] ties together the identity of a device, a [`Transport`], a
/// [`Protocol`] and the [`Registry`] of sensors and actuators attached to the
/// device.
///
/// Its lifecycle is `Created → Connected → ShuttingDown → Closed`:
///
/// 1. [`GvComm::connect`] opens the transport session
/// 2. [`GvComm::add_device`], [`GvComm::add_sensor`] and
///    [`GvComm::add_actuator`] announce the device and its entities
/// 3. the application periodically calls [`GvComm::send_sensor_data`] and
///    [`GvComm::poll`]
/// 4. [`GvComm::shutdown`] announces the removals and closes the session
///
/// # Concurrency
///
/// No background thread is spawned: the application drives a loop calling
/// [`GvComm::poll`], which never blocks. Actuator callbacks run synchronously
/// on the polling thread, hence a slow callback stalls the loop until it
/// returns. This trade-off keeps dispatching free of any synchronization.
///
/// All mutating methods require an exclusive reference. In a multi-threaded
/// environment a [`GvComm`] must be wrapped in a mutex, so that only one
/// logical owner dispatches messages at a time.
pub struct GvComm<T, P = ProtocolV1>
where
    T: Transport,
    P: Protocol,
{
    device: DeviceInfo,
    transport: T,
    protocol: P,
    registry: Registry,
    device_callback: Option<Callback>,
    state: State,
}

impl<T, P> fmt::Debug for GvComm<T, P>
where
    T: Transport + fmt::Debug,
    P: Protocol + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GvComm")
            .field("device", &self.device)
            .field("transport", &self.transport)
            .field("protocol", &self.protocol)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> GvComm<T, ProtocolV1> {
    /// Creates a [`GvComm`] which speaks [`ProtocolV1`] over the given
    /// [`Transport`].
    #[must_use]
    #[inline]
    pub fn with_transport(device: DeviceInfo, transport: T) -> Self {
        Self::new(device, transport, ProtocolV1::new())
    }
}

impl<T, P> GvComm<T, P>
where
    T: Transport,
    P: Protocol,
{
    /// Creates a [`GvComm`].
    ///
    /// The transport is not connected until [`GvComm::connect`] is called.
    #[must_use]
    pub fn new(device: DeviceInfo, transport: T, protocol: P) -> Self {
        Self {
            device,
            transport,
            protocol,
            registry: Registry::new(),
            device_callback: None,
            state: State::Created,
        }
    }

    /// Returns the [`DeviceInfo`].
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    /// Returns an immutable reference to the [`Transport`].
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns an immutable reference to the [`Protocol`].
    #[must_use]
    pub const fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Returns an immutable reference to the [`Registry`].
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the current [`State`].
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Connects to the network.
    ///
    /// Opens the transport session and subscribes to the device channel,
    /// where system-level commands are received.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::AlreadyConnected`] if [`GvComm`] is not in the
    ///   [`State::Created`] state. The transport is left untouched.
    /// - Any transport error. The state remains [`State::Created`].
    pub fn connect(&mut self) -> Result<()> {
        if self.state != State::Created {
            return Err(Error::new(
                ErrorKind::AlreadyConnected,
                format!("Cannot connect in the `{}` state", self.state),
            ));
        }

        self.transport.connect()?;

        let channel = self.protocol.device_channel(&self.device);
        if let Err(e) = self.transport.subscribe(&channel) {
            if let Err(disconnect_error) = self.transport.disconnect() {
                warn!("Failed to disconnect after a subscription failure: {disconnect_error}");
            }
            return Err(e);
        }

        self.state = State::Connected;
        info!("Device `{}` connected", self.device.id());

        Ok(())
    }

    /// Announces the device to the network.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - Any encoding or transport error
    pub fn add_device(&mut self) -> Result<()> {
        self.ensure_connected("announce the device")?;

        let message =
            self.protocol
                .encode_announce(&self.device, Entity::Device, AnnounceKind::AddDevice)?;

        send_message(&mut self.transport, &message)
    }

    /// Sets the callback invoked with system-level commands addressed to the
    /// device, for example sleep or wake up requests.
    pub fn on_device_message(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.device_callback = Some(Box::new(callback));
    }

    /// Registers a sensor and announces it to the network.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - [`ErrorKind::InvalidId`] if the identifier cannot be embedded into a
    ///   channel
    /// - [`ErrorKind::DuplicateId`] if the identifier is already registered.
    ///   No message is sent.
    /// - Any encoding or transport error. The sensor is not registered.
    pub fn add_sensor(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<()> {
        self.ensure_connected("add a sensor")?;

        let descriptor = Descriptor::new(id, name, kind)?;
        self.registry.add_sensor(descriptor.clone())?;

        let result = self
            .protocol
            .encode_announce(
                &self.device,
                Entity::Sensor(&descriptor),
                AnnounceKind::AddSensor,
            )
            .and_then(|message| send_message(&mut self.transport, &message));

        self.commit_or_rollback(&descriptor, result)
    }

    /// Registers an actuator, subscribes to its command channel and announces
    /// it to the network.
    ///
    /// The callback receives the payload of every command addressed to the
    /// actuator.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - [`ErrorKind::InvalidId`] if the identifier cannot be embedded into a
    ///   channel
    /// - [`ErrorKind::DuplicateId`] if the identifier is already registered.
    ///   No message is sent.
    /// - Any encoding or transport error. The actuator is not registered.
    pub fn add_actuator(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        callback: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<()> {
        self.ensure_connected("add an actuator")?;

        let descriptor = Descriptor::new(id, name, kind)?;
        self.registry
            .add_actuator(Actuator::new(descriptor.clone(), callback))?;

        let channel = self
            .protocol
            .channel_for(&self.device, descriptor.id(), Direction::Inbound);

        let result = self.subscribe_and_announce(&descriptor, &channel);

        self.commit_or_rollback(&descriptor, result)
    }

    /// Removes a sensor or an actuator and announces the removal to the
    /// network.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - [`ErrorKind::NotFound`] if no entity has the given identifier
    /// - Any encoding or transport error. The entity is removed anyway.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.ensure_connected("remove an entity")?;

        let entry = self.registry.remove(id)?;

        if !entry.is_sensor() {
            let channel = self
                .protocol
                .channel_for(&self.device, id, Direction::Inbound);
            if let Err(e) = self.transport.unsubscribe(&channel) {
                warn!("Failed to unsubscribe from `{channel}`: {e}");
            }
        }

        let message = self.protocol.encode_announce(
            &self.device,
            entity_of(&entry),
            AnnounceKind::RemoveEntity,
        )?;

        send_message(&mut self.transport, &message)
    }

    /// Sends a sensor reading.
    ///
    /// The value is serialized by the [`Protocol`]. Failures are never
    /// retried.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - [`ErrorKind::UnknownSensor`] if no sensor has the given identifier.
    ///   No message is sent.
    /// - Any encoding or transport error
    pub fn send_sensor_data<V: Serialize + ?Sized>(&mut self, id: &str, value: &V) -> Result<()> {
        self.ensure_connected("send sensor data")?;

        if !self.registry.is_sensor(id) {
            return Err(Error::new(
                ErrorKind::UnknownSensor,
                format!("No sensor registered with identifier `{id}`"),
            ));
        }

        let message = self.protocol.encode_sensor_data(&self.device, id, value)?;

        send_message(&mut self.transport, &message)
    }

    /// Sends the [`DeviceStatus`].
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidState`] if not connected
    /// - Any encoding or transport error
    pub fn send_status(&mut self, status: &DeviceStatus) -> Result<()> {
        self.ensure_connected("send the device status")?;

        let message = self.protocol.encode_status(&self.device, status)?;

        send_message(&mut self.transport, &message)
    }

    /// Fetches at most one inbound message and dispatches it.
    ///
    /// This method never blocks. A message which cannot be decoded, or whose
    /// target has no registered callback, is discarded: a single bad message
    /// never stops the polling loop.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::InvalidState`] error if not connected.
    pub fn poll(&mut self) -> Result<PollStatus> {
        self.ensure_connected("poll")?;

        let Some(message) = self.transport.poll() else {
            return Ok(PollStatus::Empty);
        };

        let decoded = match self.protocol.decode_inbound(&self.device, message) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding inbound message: {e}");
                return Ok(PollStatus::Discarded);
            }
        };

        if decoded.direction != Direction::Inbound {
            debug!("Discarding outbound message for {:?}", decoded.target);
            return Ok(PollStatus::Discarded);
        }

        match decoded.target {
            Target::Device => {
                let Some(callback) = self.device_callback.as_mut() else {
                    debug!("Discarding device message: no callback set");
                    return Ok(PollStatus::Discarded);
                };
                callback(&decoded.payload);
                Ok(PollStatus::Dispatched(Target::Device))
            }
            Target::Entity(id) => {
                let Some(actuator) = self.registry.actuator_mut(&id) else {
                    warn!("Discarding message for the unknown actuator `{id}`");
                    return Ok(PollStatus::Discarded);
                };
                actuator.invoke(&decoded.payload);
                Ok(PollStatus::Dispatched(Target::Entity(id)))
            }
        }
    }

    /// Shuts down the communication.
    ///
    /// When connected, the removal of every registered entity and of the
    /// device itself is announced. The registry is then cleared and the
    /// transport disconnected. Announcement and disconnection failures are
    /// logged and never interrupt the teardown.
    ///
    /// Calling this method on a closed communication is a no-op.
    pub fn shutdown(&mut self) {
        let connected = match self.state {
            State::Connected => true,
            State::Created => false,
            State::ShuttingDown | State::Closed => {
                debug!("Shutdown already performed");
                return;
            }
        };

        self.state = State::ShuttingDown;

        let entries = self.registry.drain().collect::<Vec<Entry>>();

        if connected {
            for entry in &entries {
                self.announce_removal(entity_of(entry));
            }
            self.announce_removal(Entity::Device);
        }

        drop(entries);
        self.device_callback = None;

        if let Err(e) = self.transport.disconnect() {
            warn!("Failed to disconnect the transport: {e}");
        }

        self.state = State::Closed;
        info!("Device `{}` shut down", self.device.id());
    }

    fn ensure_connected(&self, operation: &str) -> Result<()> {
        if self.state == State::Connected {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidState,
                format!("Cannot {operation} in the `{}` state", self.state),
            ))
        }
    }

    fn commit_or_rollback(&mut self, descriptor: &Descriptor, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                info!("Registered {descriptor}");
                Ok(())
            }
            Err(e) => {
                let _ = self.registry.remove(descriptor.id());
                Err(e)
            }
        }
    }

    fn subscribe_and_announce(&mut self, descriptor: &Descriptor, channel: &str) -> Result<()> {
        self.transport.subscribe(channel)?;

        let result = self
            .protocol
            .encode_announce(
                &self.device,
                Entity::Actuator(descriptor),
                AnnounceKind::AddActuator,
            )
            .and_then(|message| send_message(&mut self.transport, &message));

        if result.is_err() {
            if let Err(e) = self.transport.unsubscribe(channel) {
                warn!("Failed to unsubscribe from `{channel}`: {e}");
            }
        }

        result
    }

    fn announce_removal(&mut self, entity: Entity<'_>) {
        let result = self
            .protocol
            .encode_announce(&self.device, entity, AnnounceKind::RemoveEntity)
            .and_then(|message| send_message(&mut self.transport, &message));

        if let Err(e) = result {
            warn!("Failed to announce the removal of {entity:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    use core::sync::atomic::{AtomicUsize, Ordering};

    use std::sync::Mutex;

    use serde_json::json;

    use crate::device::DeviceInfo;
    use crate::error::ErrorKind;
    use crate::protocol::{DeviceStatus, Direction, Protocol, ProtocolV1, Target};
    use crate::tests::{EventLog, MemoryTransport};
    use crate::transport::Message;

    use super::{GvComm, PollStatus, State};

    fn device() -> DeviceInfo {
        DeviceInfo::new("node", "Test node", "127.0.0.1", 8080).unwrap()
    }

    fn connected() -> (GvComm<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let mut comm = GvComm::with_transport(device(), transport.clone());
        comm.connect().unwrap();
        (comm, transport)
    }

    fn inbound(entity_id: &str, payload: &[u8]) -> Message {
        Message::new(
            ProtocolV1.channel_for(&device(), entity_id, Direction::Inbound),
            payload.to_vec(),
        )
    }

    #[test]
    fn connect_subscribes_device_channel() {
        let (comm, transport) = connected();

        assert_eq!(comm.state(), State::Connected);
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.subscriptions(), ["/devices/node/input"]);
    }

    #[test]
    fn connect_twice() {
        let (mut comm, transport) = connected();

        let error = comm.connect().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::AlreadyConnected);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[test]
    fn failed_connect() {
        let transport = MemoryTransport::new();
        transport.fail_connect(true);

        let mut comm = GvComm::with_transport(device(), transport.clone());
        let error = comm.connect().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connection);
        assert_eq!(comm.state(), State::Created);

        // Shutdown is safe after a failed connection.
        comm.shutdown();
        assert_eq!(comm.state(), State::Closed);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn failed_device_subscription() {
        let transport = MemoryTransport::new();
        transport.fail_subscribe(true);

        let mut comm = GvComm::with_transport(device(), transport.clone());
        let error = comm.connect().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Subscription);
        assert_eq!(comm.state(), State::Created);
        assert!(!transport.is_connected());
    }

    #[test]
    fn operations_before_connect() {
        let mut comm = GvComm::with_transport(device(), MemoryTransport::new());

        assert_eq!(
            comm.add_sensor("temp", "Temperature", "temperature")
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            comm.add_actuator("led", "Led", "switch", |_| {})
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(comm.add_device().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(comm.poll().unwrap_err().kind(), ErrorKind::InvalidState);
        assert!(comm.registry().is_empty());
    }

    #[test]
    fn announce_device_and_entities() {
        let (mut comm, transport) = connected();

        comm.add_device().unwrap();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        comm.add_actuator("led", "Led", "switch", |_| {}).unwrap();

        let channels = transport
            .sent()
            .into_iter()
            .map(|message| message.channel)
            .collect::<Vec<_>>();
        assert_eq!(
            channels,
            [
                "/devices",
                "/devices/node/sensors",
                "/devices/node/actuators"
            ]
        );
        assert_eq!(
            transport.subscriptions(),
            ["/devices/node/input", "/devices/node/actuators/led/input"]
        );
        assert_eq!(comm.registry().len(), 2);
    }

    #[test]
    fn duplicate_sensor() {
        let (mut comm, transport) = connected();

        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        let error = comm.add_sensor("temp", "Other", "humidity").unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DuplicateId);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(comm.registry().sensor("temp").unwrap().name(), "Temperature");
    }

    #[test]
    fn duplicate_actuator_makes_no_network_call() {
        let (mut comm, transport) = connected();

        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        let error = comm
            .add_actuator("temp", "Heater", "switch", |_| {})
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DuplicateId);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.subscriptions().len(), 1);
    }

    #[test]
    fn failed_announcement_rolls_back() {
        let (mut comm, transport) = connected();
        transport.fail_send(true);

        let error = comm
            .add_sensor("temp", "Temperature", "temperature")
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SendFailure);
        assert!(!comm.registry().contains("temp"));

        let error = comm.add_actuator("led", "Led", "switch", |_| {}).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SendFailure);
        assert!(comm.registry().is_empty());
        assert_eq!(
            transport.unsubscriptions(),
            ["/devices/node/actuators/led/input"]
        );
    }

    #[test]
    fn send_sensor_data() {
        let (mut comm, transport) = connected();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();

        comm.send_sensor_data("temp", &21.5).unwrap();

        let message = transport.sent().pop().unwrap();
        assert_eq!(message.channel, "/devices/node/sensors/temp/data");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&message.payload).unwrap(),
            json!({ "id": "temp", "value": 21.5 })
        );
    }

    #[test]
    fn send_unknown_sensor_data() {
        let (mut comm, transport) = connected();
        comm.add_actuator("led", "Led", "switch", |_| {}).unwrap();
        let sent = transport.sent().len();

        for id in ["humidity", "led"] {
            let error = comm.send_sensor_data(id, &1).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::UnknownSensor);
        }
        assert_eq!(transport.sent().len(), sent);
    }

    #[test]
    fn send_failures_are_not_retried() {
        let (mut comm, transport) = connected();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        transport.fail_send(true);

        let error = comm.send_sensor_data("temp", &20).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SendFailure);
        assert_eq!(transport.send_calls(), 2);
    }

    #[test]
    fn poll_without_data() {
        let (mut comm, _transport) = connected();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        comm.add_actuator("a1", "Actuator", "switch", move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(comm.poll().unwrap(), PollStatus::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_to_actuator() {
        let (mut comm, transport) = connected();
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&payloads);

        comm.add_actuator("a1", "Actuator", "switch", move |payload| {
            recorder.lock().unwrap().push(payload.to_vec());
        })
        .unwrap();

        transport.deliver(inbound("a1", b"42"));

        assert_eq!(
            comm.poll().unwrap(),
            PollStatus::Dispatched(Target::Entity("a1".into()))
        );
        assert_eq!(comm.poll().unwrap(), PollStatus::Empty);
        assert_eq!(*payloads.lock().unwrap(), [b"42".to_vec()]);
    }

    #[test]
    fn one_dispatch_per_poll() {
        let (mut comm, transport) = connected();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        comm.add_actuator("a1", "Actuator", "switch", move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        transport.deliver(inbound("a1", b"on"));
        transport.deliver(inbound("a1", b"off"));

        let _ = comm.poll().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let _ = comm.poll().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn discard_unroutable_messages() {
        let (mut comm, transport) = connected();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        comm.add_actuator("a1", "Actuator", "switch", move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();

        // Unregistered actuator.
        transport.deliver(inbound("a2", b"42"));
        // Unrecognized channel.
        transport.deliver(Message::new("/devices/other/actuators/a1/input", b"42".to_vec()));
        // Malformed sensor frame.
        transport.deliver(Message::new("/devices/node/sensors/temp/data", b"{".to_vec()));
        // A well-formed echo of an outbound reading.
        transport.deliver(
            ProtocolV1
                .encode_sensor_data(&device(), "temp", &3)
                .unwrap(),
        );
        // A command for a sensor.
        transport.deliver(inbound("temp", b"1"));
        // A device command without a device callback.
        transport.deliver(Message::new("/devices/node/input", b"sleep".to_vec()));

        for _ in 0..6 {
            assert_eq!(comm.poll().unwrap(), PollStatus::Discarded);
        }
        assert_eq!(comm.poll().unwrap(), PollStatus::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_to_device() {
        let (mut comm, transport) = connected();
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&payloads);

        comm.on_device_message(move |payload| {
            recorder.lock().unwrap().push(payload.to_vec());
        });

        transport.deliver(Message::new("/devices/node/input", b"sleep".to_vec()));

        assert_eq!(comm.poll().unwrap(), PollStatus::Dispatched(Target::Device));
        assert_eq!(*payloads.lock().unwrap(), [b"sleep".to_vec()]);
    }

    #[test]
    fn remove_entities() {
        let (mut comm, transport) = connected();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        comm.add_actuator("led", "Led", "switch", |_| {}).unwrap();

        comm.remove("led").unwrap();
        assert_eq!(transport.unsubscriptions(), ["/devices/node/actuators/led/input"]);

        let message = transport.sent().pop().unwrap();
        assert_eq!(message.channel, "/devices/node/actuators");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&message.payload).unwrap(),
            json!({ "id": "led", "rm": true })
        );

        assert_eq!(comm.remove("led").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(comm.registry().contains("temp"));
    }

    #[test]
    fn listener_follows_session() {
        let transport = MemoryTransport::new();
        let events = Arc::new(EventLog::default());
        transport.add_listener(events.clone());

        let mut comm = GvComm::with_transport(device(), transport);
        comm.connect().unwrap();
        comm.add_actuator("led", "Led", "switch", |_| {}).unwrap();
        comm.remove("led").unwrap();
        comm.shutdown();

        assert_eq!(
            events.events(),
            [
                "connect",
                "subscribe /devices/node/input",
                "subscribe /devices/node/actuators/led/input",
                "unsubscribe /devices/node/actuators/led/input",
                "disconnect",
            ]
        );
    }

    #[test]
    fn listener_sees_failed_connect() {
        let transport = MemoryTransport::new();
        transport.fail_connect(true);
        let events = Arc::new(EventLog::default());
        transport.add_listener(events.clone());

        let mut comm = GvComm::with_transport(device(), transport);
        assert!(comm.connect().is_err());
        comm.shutdown();

        // No session was established, so nothing is torn down.
        assert_eq!(events.events(), ["connection failed: Broker unreachable"]);
    }

    #[test]
    fn send_status() {
        let (mut comm, transport) = connected();

        comm.send_status(&DeviceStatus::Online).unwrap();

        let message = transport.sent().pop().unwrap();
        assert_eq!(message.channel, "/status");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&message.payload).unwrap(),
            json!({ "id": "node", "st": true })
        );
    }

    #[test]
    fn shutdown_announces_removals() {
        let (mut comm, transport) = connected();
        comm.add_device().unwrap();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        comm.add_actuator("led", "Led", "switch", |_| {}).unwrap();
        let before = transport.sent().len();

        comm.shutdown();

        let removals = transport
            .sent()
            .into_iter()
            .skip(before)
            .map(|message| message.channel)
            .collect::<Vec<_>>();
        assert_eq!(
            removals,
            ["/devices/node/sensors", "/devices/node/actuators", "/devices"]
        );
        assert_eq!(comm.state(), State::Closed);
        assert!(comm.registry().is_empty());
        assert_eq!(transport.disconnect_calls(), 1);
        assert!(!transport.is_connected());
    }

    #[test]
    fn shutdown_is_best_effort() {
        let (mut comm, transport) = connected();
        comm.add_sensor("temp", "Temperature", "temperature").unwrap();
        transport.fail_send(true);

        comm.shutdown();

        assert_eq!(comm.state(), State::Closed);
        assert!(comm.registry().is_empty());
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[test]
    fn shutdown_twice() {
        let (mut comm, transport) = connected();

        comm.shutdown();
        let sent = transport.sent().len();
        comm.shutdown();

        assert_eq!(comm.state(), State::Closed);
        assert_eq!(transport.sent().len(), sent);
        assert_eq!(transport.disconnect_calls(), 1);

        // A closed communication cannot be reopened.
        assert_eq!(comm.connect().unwrap_err().kind(), ErrorKind::AlreadyConnected);
        assert_eq!(
            comm.send_sensor_data("temp", &1).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn borrowed_transport() {
        let mut transport = MemoryTransport::new();
        {
            let mut comm = GvComm::with_transport(device(), &mut transport);
            comm.connect().unwrap();
            comm.shutdown();
        }
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.disconnect_calls(), 1);
    }
}
