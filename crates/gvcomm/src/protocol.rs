use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use serde_json::value::RawValue;

use crate::device::{DeviceInfo, validate_id};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::Descriptor;
use crate::transport::Message;

// Channel where devices are announced.
const DEVICES_CHANNEL: &str = "/devices";
// Channel where device statuses are published.
const STATUS_CHANNEL: &str = "/status";

/// Direction of a message with respect to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the node to the remote party, for example sensor readings.
    Outbound,
    /// From the remote party to the node, for example actuator commands.
    Inbound,
}

/// Kinds of announcements sent to the remote party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceKind {
    /// A device joins the network.
    AddDevice,
    /// A sensor has been attached to a device.
    AddSensor,
    /// An actuator has been attached to a device.
    AddActuator,
    /// A device, a sensor or an actuator leaves the network.
    RemoveEntity,
}

/// The subject of an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity<'a> {
    /// The device itself.
    Device,
    /// A sensor.
    Sensor(&'a Descriptor),
    /// An actuator.
    Actuator(&'a Descriptor),
}

/// The recipient of a decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The device itself.
    Device,
    /// The sensor or actuator with the given identifier.
    Entity(String),
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Message recipient.
    pub target: Target,
    /// Message direction.
    pub direction: Direction,
    /// Decoded payload.
    pub payload: Vec<u8>,
}

impl Decoded {
    /// Returns the identifier of the addressed sensor or actuator, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        match &self.target {
            Target::Entity(id) => Some(id),
            Target::Device => None,
        }
    }

    /// Deserializes the payload as a `JSON` value of type `T`.
    ///
    /// # Errors
    ///
    /// A [`ErrorKind::MalformedPayload`] error is returned when the payload
    /// is not a valid `JSON` representation of `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            Error::new(
                ErrorKind::MalformedPayload,
                format!("Payload is not a valid value: {e}"),
            )
        })
    }
}

/// The status of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The device is online.
    Online,
    /// The device is offline.
    Offline,
    /// A custom status, for example `DEMO`.
    Custom(String),
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("Online"),
            Self::Offline => f.write_str("Offline"),
            Self::Custom(status) => f.write_str(status),
        }
    }
}

impl Serialize for DeviceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        match self {
            Self::Online => serializer.serialize_bool(true),
            Self::Offline => serializer.serialize_bool(false),
            Self::Custom(status) => serializer.serialize_str(status),
        }
    }
}

/// A message protocol.
///
/// A protocol translates application intents into transport messages and
/// back, and owns the scheme binding a device and an entity identifier to a
/// concrete channel.
pub trait Protocol {
    /// Returns the channel of an entity for the given [`Direction`].
    ///
    /// Distinct `(device, entity, direction)` triples, built from valid
    /// identifiers, never map to the same channel.
    fn channel_for(&self, device: &DeviceInfo, entity_id: &str, direction: Direction) -> String;

    /// Returns the channel where system-level commands addressed to the
    /// device are received.
    fn device_channel(&self, device: &DeviceInfo) -> String;

    /// Encodes a sensor reading.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Encoding`] error is returned when the value cannot
    /// be serialized.
    fn encode_sensor_data<V: Serialize + ?Sized>(
        &self,
        device: &DeviceInfo,
        sensor_id: &str,
        value: &V,
    ) -> Result<Message>;

    /// Decodes a message received by the device.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnrecognizedChannel`] when the channel does not belong
    ///   to the device naming scheme
    /// - [`ErrorKind::MalformedPayload`] when the payload cannot be decoded
    fn decode_inbound(&self, device: &DeviceInfo, message: Message) -> Result<Decoded>;

    /// Encodes an announcement about the device or one of its entities.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Encoding`] error is returned when the announcement
    /// kind does not apply to the given entity or when the announcement
    /// cannot be serialized.
    fn encode_announce(
        &self,
        device: &DeviceInfo,
        entity: Entity<'_>,
        kind: AnnounceKind,
    ) -> Result<Message>;

    /// Encodes the status of the device.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Encoding`] error is returned when the status cannot
    /// be serialized.
    fn encode_status(&self, device: &DeviceInfo, status: &DeviceStatus) -> Result<Message>;
}

#[derive(Serialize)]
struct DevicePayload<'a> {
    id: &'a str,
    nm: &'a str,
    ip: &'a str,
    prt: u16,
}

#[derive(Serialize)]
struct SensorPayload<'a> {
    id: &'a str,
    nm: &'a str,
    tp: &'a str,
}

#[derive(Serialize)]
struct ActuatorPayload<'a> {
    id: &'a str,
    nm: &'a str,
    tp: &'a str,
    to: &'a str,
}

#[derive(Serialize)]
struct RemovePayload<'a> {
    id: &'a str,
    rm: bool,
}

#[derive(Serialize)]
struct StatusPayload<'a> {
    id: &'a str,
    st: &'a DeviceStatus,
}

#[derive(Serialize)]
struct DataPayload<'a, V: ?Sized> {
    id: &'a str,
    value: &'a V,
}

#[derive(Deserialize)]
struct DataFrame {
    id: String,
    value: Box<RawValue>,
}

#[inline]
fn json<T: Serialize + ?Sized>(channel: String, payload: &T) -> Result<Message> {
    Ok(Message::new(channel, serde_json::to_vec(payload)?))
}

#[inline]
fn device_root(device: &DeviceInfo) -> String {
    format!("{DEVICES_CHANNEL}/{}", device.id())
}

fn unrecognized_channel(channel: &str) -> Error {
    Error::new(
        ErrorKind::UnrecognizedChannel,
        format!("Channel `{channel}` does not belong to the device"),
    )
}

fn malformed_payload(description: impl Into<alloc::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::MalformedPayload, description)
}

/// Version 1 of the GreenVulcano protocol for IoT communication.
///
/// | Purpose | Channel |
/// |---|---|
/// | Device announcements | `/devices` |
/// | Sensor announcements | `/devices/<device>/sensors` |
/// | Actuator announcements | `/devices/<device>/actuators` |
/// | Sensor readings | `/devices/<device>/sensors/<sensor>/data` |
/// | Actuator commands | `/devices/<device>/actuators/<actuator>/input` |
/// | Device commands | `/devices/<device>/input` |
/// | Device status | `/status` |
///
/// Announcements and readings are compact `JSON` objects. Commands are
/// opaque and delivered verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolV1;

impl ProtocolV1 {
    /// Creates a [`ProtocolV1`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decode_data_frame(sensor_id: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let frame = serde_json::from_slice::<DataFrame>(payload)
            .map_err(|e| malformed_payload(format!("Invalid sensor data frame: {e}")))?;

        if frame.id != sensor_id {
            return Err(malformed_payload(format!(
                "Sensor data frame for `{}` received on the channel of `{sensor_id}`",
                frame.id
            )));
        }

        // The value is returned verbatim, a round trip through `Value` would
        // lose the precision of large integers.
        Ok(frame.value.get().as_bytes().to_vec())
    }
}

impl Protocol for ProtocolV1 {
    fn channel_for(&self, device: &DeviceInfo, entity_id: &str, direction: Direction) -> String {
        match direction {
            Direction::Outbound => format!("{}/sensors/{entity_id}/data", device_root(device)),
            Direction::Inbound => format!("{}/actuators/{entity_id}/input", device_root(device)),
        }
    }

    fn device_channel(&self, device: &DeviceInfo) -> String {
        format!("{}/input", device_root(device))
    }

    fn encode_sensor_data<V: Serialize + ?Sized>(
        &self,
        device: &DeviceInfo,
        sensor_id: &str,
        value: &V,
    ) -> Result<Message> {
        json(
            self.channel_for(device, sensor_id, Direction::Outbound),
            &DataPayload {
                id: sensor_id,
                value,
            },
        )
    }

    fn decode_inbound(&self, device: &DeviceInfo, message: Message) -> Result<Decoded> {
        let Some(path) = message
            .channel
            .strip_prefix(DEVICES_CHANNEL)
            .and_then(|path| path.strip_prefix('/'))
            .and_then(|path| path.strip_prefix(device.id()))
            .and_then(|path| path.strip_prefix('/'))
        else {
            return Err(unrecognized_channel(&message.channel));
        };

        let segments = path.split('/').collect::<Vec<&str>>();

        let (target, direction, payload) = match segments.as_slice() {
            ["input"] => (Target::Device, Direction::Inbound, message.payload),
            ["actuators", id, "input"] if validate_id(id).is_ok() => (
                Target::Entity((*id).into()),
                Direction::Inbound,
                message.payload,
            ),
            ["sensors", id, "data"] if validate_id(id).is_ok() => (
                Target::Entity((*id).into()),
                Direction::Outbound,
                Self::decode_data_frame(id, &message.payload)?,
            ),
            _ => return Err(unrecognized_channel(&message.channel)),
        };

        Ok(Decoded {
            target,
            direction,
            payload,
        })
    }

    fn encode_announce(
        &self,
        device: &DeviceInfo,
        entity: Entity<'_>,
        kind: AnnounceKind,
    ) -> Result<Message> {
        match (kind, entity) {
            (AnnounceKind::AddDevice, Entity::Device) => json(
                DEVICES_CHANNEL.into(),
                &DevicePayload {
                    id: device.id(),
                    nm: device.name(),
                    ip: device.address(),
                    prt: device.port(),
                },
            ),
            (AnnounceKind::AddSensor, Entity::Sensor(descriptor)) => json(
                format!("{}/sensors", device_root(device)),
                &SensorPayload {
                    id: descriptor.id(),
                    nm: descriptor.name(),
                    tp: descriptor.kind(),
                },
            ),
            (AnnounceKind::AddActuator, Entity::Actuator(descriptor)) => {
                let input = self.channel_for(device, descriptor.id(), Direction::Inbound);
                json(
                    format!("{}/actuators", device_root(device)),
                    &ActuatorPayload {
                        id: descriptor.id(),
                        nm: descriptor.name(),
                        tp: descriptor.kind(),
                        to: &input,
                    },
                )
            }
            (AnnounceKind::RemoveEntity, entity) => {
                let (channel, id) = match entity {
                    Entity::Device => (DEVICES_CHANNEL.into(), device.id()),
                    Entity::Sensor(descriptor) => (
                        format!("{}/sensors", device_root(device)),
                        descriptor.id(),
                    ),
                    Entity::Actuator(descriptor) => (
                        format!("{}/actuators", device_root(device)),
                        descriptor.id(),
                    ),
                };
                json(channel, &RemovePayload { id, rm: true })
            }
            (kind, entity) => Err(Error::new(
                ErrorKind::Encoding,
                format!("The {kind:?} announcement does not apply to {entity:?}"),
            )),
        }
    }

    fn encode_status(&self, device: &DeviceInfo, status: &DeviceStatus) -> Result<Message> {
        json(
            STATUS_CHANNEL.into(),
            &StatusPayload {
                id: device.id(),
                st: status,
            },
        )
    }
}
