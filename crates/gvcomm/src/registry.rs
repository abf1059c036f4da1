use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;

use core::fmt;

use hashbrown::DefaultHashBuilder;

use indexmap::IndexMap;
use indexmap::map::Entry as MapEntry;

use crate::device::validate_id;
use crate::error::{Error, ErrorKind, Result};

/// A function invoked with the payload of every command addressed to an
/// actuator.
///
/// Callbacks run synchronously on the thread which polls the communication,
/// so a slow callback delays the dispatch of all subsequent messages.
pub type Callback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Metadata of a sensor or an actuator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    id: String,
    name: String,
    kind: String,
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.id, self.kind)
    }
}

impl Descriptor {
    /// Creates a [`Descriptor`].
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::InvalidId`] error is returned when the identifier
    /// cannot be embedded into a channel, see [`validate_id`].
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;

        Ok(Self {
            id,
            name: name.into(),
            kind: kind.into(),
        })
    }

    /// Returns the entity identifier, unique within a node.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entity kind, for example `temperature` or `led`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// An actuator along with the [`Callback`] receiving its commands.
pub struct Actuator {
    descriptor: Descriptor,
    callback: Callback,
}

impl fmt::Debug for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actuator")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    /// Creates an [`Actuator`].
    #[must_use]
    pub fn new(descriptor: Descriptor, callback: impl FnMut(&[u8]) + Send + 'static) -> Self {
        Self {
            descriptor,
            callback: Box::new(callback),
        }
    }

    /// Returns the actuator [`Descriptor`].
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Invokes the actuator callback with the given payload.
    #[inline]
    pub fn invoke(&mut self, payload: &[u8]) {
        (self.callback)(payload);
    }
}

/// A registry entry.
#[derive(Debug)]
pub enum Entry {
    /// A sensor.
    Sensor(Descriptor),
    /// An actuator.
    Actuator(Actuator),
}

impl Entry {
    /// Returns the entry [`Descriptor`].
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        match self {
            Self::Sensor(descriptor) => descriptor,
            Self::Actuator(actuator) => &actuator.descriptor,
        }
    }

    /// Checks whether the entry is a sensor.
    #[must_use]
    pub const fn is_sensor(&self) -> bool {
        matches!(self, Self::Sensor(_))
    }
}

/// The sensors and actuators attached to a node.
///
/// Identifiers are unique across the whole registry: an identifier can
/// belong either to a sensor or to an actuator.
#[derive(Debug)]
pub struct Registry {
    entries: IndexMap<String, Entry, DefaultHashBuilder>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty [`Registry`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::with_hasher(DefaultHashBuilder::default()),
        }
    }

    /// Adds a sensor.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::DuplicateId`] error is returned if an entity with
    /// the same identifier is already registered. In that case the registry
    /// is left unchanged.
    pub fn add_sensor(&mut self, descriptor: Descriptor) -> Result<()> {
        self.insert(Entry::Sensor(descriptor))
    }

    /// Adds an actuator.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::DuplicateId`] error is returned if an entity with
    /// the same identifier is already registered. In that case the registry
    /// is left unchanged.
    pub fn add_actuator(&mut self, actuator: Actuator) -> Result<()> {
        self.insert(Entry::Actuator(actuator))
    }

    /// Removes the entity with the given identifier and returns it.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::NotFound`] error is returned if no entity is
    /// registered with the given identifier.
    pub fn remove(&mut self, id: &str) -> Result<Entry> {
        self.entries.swap_remove(id).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("No entity registered with identifier `{id}`"),
            )
        })
    }

    /// Returns the [`Actuator`] with the given identifier.
    #[must_use]
    pub fn lookup_actuator(&self, id: &str) -> Option<&Actuator> {
        match self.entries.get(id) {
            Some(Entry::Actuator(actuator)) => Some(actuator),
            _ => None,
        }
    }

    /// Returns a mutable reference to the [`Actuator`] with the given
    /// identifier.
    #[must_use]
    pub fn actuator_mut(&mut self, id: &str) -> Option<&mut Actuator> {
        match self.entries.get_mut(id) {
            Some(Entry::Actuator(actuator)) => Some(actuator),
            _ => None,
        }
    }

    /// Returns the sensor [`Descriptor`] with the given identifier.
    #[must_use]
    pub fn sensor(&self, id: &str) -> Option<&Descriptor> {
        match self.entries.get(id) {
            Some(Entry::Sensor(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    /// Checks whether a sensor with the given identifier is registered.
    #[must_use]
    pub fn is_sensor(&self, id: &str) -> bool {
        self.sensor(id).is_some()
    }

    /// Checks whether an entity with the given identifier is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all registered entities.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Removes all entities, returning them as an iterator.
    pub fn drain(&mut self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.drain(..).map(|(_, entry)| entry)
    }

    /// Removes all entities.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(&mut self, entry: Entry) -> Result<()> {
        match self.entries.entry(entry.descriptor().id.clone()) {
            MapEntry::Occupied(occupied) => Err(Error::new(
                ErrorKind::DuplicateId,
                format!("`{}` is already registered", occupied.key()),
            )),
            MapEntry::Vacant(vacant) => {
                let _ = vacant.insert(entry);
                Ok(())
            }
        }
    }
}
