use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Error, Result};

/// A 48-bit Bluetooth device address, most significant byte first (the order
/// it is printed in).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ConfigError;

    /// Accepts `A4:C1:38:00:11:22`, `A4-C1-38-00-11-22` or `A4C138001122`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if compact.len() != 12 {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        hex::decode_to_slice(&compact, &mut octets).map_err(|_| invalid())?;
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

/// 16-byte AES key shared with a device.
#[derive(Clone, PartialEq, Eq)]
pub struct BindKey(pub [u8; 16]);

impl BindKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for BindKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut key = [0u8; 16];
        hex::decode_to_slice(s.trim(), &mut key).map_err(|_| ConfigError::InvalidBindKey)?;
        Ok(Self(key))
    }
}

// Never print key material.
impl fmt::Debug for BindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BindKey(..)")
    }
}

/// A monitored sensor. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub address: MacAddress,
    pub bind_key: Option<BindKey>,
}

impl DeviceRegistration {
    pub fn new(address: MacAddress, bind_key: Option<BindKey>) -> Self {
        Self { address, bind_key }
    }
}

/// `MAC[=BINDKEY]`, the form devices are given on the command line.
impl FromStr for DeviceRegistration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, key) = match s.split_once('=') {
            Some((address, key)) => (address, Some(key.parse::<BindKey>()?)),
            None => (s, None),
        };
        Ok(Self::new(address.trim().parse::<MacAddress>()?, key))
    }
}

/// Per-device replay state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSession {
    pub last_counter: Option<u32>,
    pub last_packet_id: Option<u8>,
}

impl DeviceSession {
    /// Rejects an encrypted packet counter that is not strictly newer than the
    /// last accepted one.
    pub fn check_counter(&self, counter: u32) -> Result<()> {
        match self.last_counter {
            Some(last) if counter <= last => Err(Error::ReplayOrDuplicate { counter, last }),
            _ => Ok(()),
        }
    }

    /// Plaintext packets only carry a wrapping 8-bit packet id, so only an
    /// exact repeat of the previous one can be detected.
    pub fn check_packet_id(&self, packet_id: u8) -> Result<()> {
        match self.last_packet_id {
            Some(last) if last == packet_id => Err(Error::ReplayOrDuplicate {
                counter: packet_id.into(),
                last: last.into(),
            }),
            _ => Ok(()),
        }
    }
}
