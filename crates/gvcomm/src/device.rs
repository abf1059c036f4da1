use alloc::format;
use alloc::string::String;

use core::fmt;

use crate::error::{Error, ErrorKind, Result};

// Characters which would make a channel ambiguous or turn it into a wildcard.
const RESERVED_CHARACTERS: &[char] = &['/', '+', '#', '\0'];

/// Checks whether an identifier can be embedded into a channel.
///
/// An identifier must be non-empty and must not contain `/`, `+`, `#` or the
/// `NUL` character.
///
/// # Errors
///
/// An [`ErrorKind::InvalidId`] error is returned when the identifier is
/// empty or contains a reserved character.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::new(ErrorKind::InvalidId, "Empty identifier"));
    }

    if let Some(c) = id.chars().find(|c| RESERVED_CHARACTERS.contains(c)) {
        return Err(Error::new(
            ErrorKind::InvalidId,
            format!("Identifier `{id}` contains the reserved character {c:?}"),
        ));
    }

    Ok(())
}

/// Identity of the node on which the library is running.
///
/// A [`DeviceInfo`] is immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    id: String,
    name: String,
    address: String,
    port: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] at {}:{}",
            self.name, self.id, self.address, self.port
        )
    }
}

impl DeviceInfo {
    /// Creates a [`DeviceInfo`].
    ///
    /// # Errors
    ///
    /// - The identifier is not valid, see [`validate_id`]
    /// - The port is `0`
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        let id = id.into();

        validate_id(&id).map_err(|e| {
            Error::new(
                ErrorKind::InvalidDeviceInfo,
                format!("Invalid device identifier: {}", e.description()),
            )
        })?;

        if port == 0 {
            return Err(Error::new(
                ErrorKind::InvalidDeviceInfo,
                format!("Device `{id}` has an invalid port number: 0"),
            ));
        }

        Ok(Self {
            id,
            name: name.into(),
            address: address.into(),
            port,
        })
    }

    /// Returns the unique device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device network address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the port on which the device wishes to be contacted back.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}
