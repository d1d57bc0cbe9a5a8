use std::fmt;

use log::trace;

use crate::cursor::Cursor;
use crate::error::{Error, Result};

/// One typed value carried by a sensor advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedField {
    /// °C
    Temperature(f32),
    /// %RH
    Humidity(f32),
    /// 0..=100 %
    BatteryLevel(u8),
    /// V
    BatteryVoltage(f32),
    /// dBm, from the advertisement's Tx Power Level record
    TxPower(i8),
    PacketId(u8),
}

impl fmt::Display for DecodedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature(t) => write!(f, "Temperature: {t:.2} °C"),
            Self::Humidity(h) => write!(f, "Humidity: {h:.2} %"),
            Self::BatteryLevel(b) => write!(f, "Battery: {b} %"),
            Self::BatteryVoltage(v) => write!(f, "Battery voltage: {v:.3} V"),
            Self::TxPower(p) => write!(f, "Tx power: {p} dBm"),
            Self::PacketId(id) => write!(f, "Packet id: {id}"),
        }
    }
}

/// Size of an object's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Fixed(usize),
    /// One length byte followed by that many bytes.
    Prefixed,
}

/// BTHome v2 object id → value width, for every object id the format
/// defines. Ids outside this table cannot be skipped.
fn object_width(id: u8) -> Option<Width> {
    let width = match id {
        0x00 | 0x01 | 0x09 | 0x0F..=0x11 | 0x15..=0x2F | 0x3A | 0x46 | 0x57..=0x59 | 0x60 => 1,
        0x02 | 0x03 | 0x06..=0x08 | 0x0C..=0x0E | 0x12..=0x14 | 0x3C | 0x3D | 0x3F | 0x40
        | 0x41 | 0x43..=0x45 | 0x47..=0x4A | 0x51 | 0x52 | 0x56 | 0x5A | 0x5D..=0x5F | 0x61
        | 0xF0 => 2,
        0x04 | 0x05 | 0x0A | 0x0B | 0x42 | 0x4B | 0xF2 => 3,
        0x3E | 0x4C..=0x50 | 0x55 | 0x5B | 0x5C | 0xF1 => 4,
        0x53 | 0x54 => return Some(Width::Prefixed),
        _ => return None,
    };
    Some(Width::Fixed(width))
}

/// Ids that map onto a [`DecodedField`].
fn is_typed(id: u8) -> bool {
    matches!(id, 0x00..=0x03 | 0x0C | 0x2E | 0x45 | 0x57)
}

impl DecodedField {
    /// Interprets the value of a typed object. `value` must already have the
    /// width from [`object_width`].
    fn from_object(id: u8, value: &[u8]) -> Result<Option<Self>> {
        let mut v = Cursor::new(value);
        let field = match id {
            0x00 => Self::PacketId(v.read_u8()?),
            0x01 => Self::BatteryLevel(v.read_u8()?.min(100)),
            0x02 => Self::Temperature(f32::from(v.read_i16()?) / 100.0),
            0x03 => Self::Humidity(f32::from(v.read_u16()?) / 100.0),
            0x0C => Self::BatteryVoltage(f32::from(v.read_u16()?) / 1000.0),
            0x2E => Self::Humidity(f32::from(v.read_u8()?)),
            0x45 => Self::Temperature(f32::from(v.read_i16()?) / 10.0),
            0x57 => Self::Temperature(f32::from(v.read_i8()?)),
            _ => return Ok(None),
        };
        Ok(Some(field))
    }
}

/// Decodes a BTHome v2 object stream: `[id][value]...`.
///
/// Objects without a typed meaning are skipped using the width table. Any
/// malformed object fails the whole packet.
pub fn decode(bytes: &[u8]) -> Result<Vec<DecodedField>> {
    let mut cursor = Cursor::new(bytes);
    let mut fields = Vec::new();

    while !cursor.is_empty() {
        let id = cursor.read_u8()?;
        let value = match object_width(id).ok_or(Error::UnknownTagWidth(id))? {
            Width::Fixed(n) => cursor.take(n)?,
            Width::Prefixed => {
                let n = cursor.read_u8()?;
                cursor.take(n.into())?
            }
        };
        match DecodedField::from_object(id, value)? {
            Some(field) => fields.push(field),
            None => trace!("skipping object {id:#04x} ({} bytes)", value.len()),
        }
    }

    Ok(fields)
}

/// Decodes a BTHome v1 object stream: `[control][id][value]...` where the low
/// five bits of the control byte count the id and value bytes.
pub fn decode_legacy(bytes: &[u8]) -> Result<Vec<DecodedField>> {
    let mut cursor = Cursor::new(bytes);
    let mut fields = Vec::new();

    while !cursor.is_empty() {
        let control = cursor.read_u8()?;
        let body = cursor.take(usize::from(control & 0x1F))?;
        let Some((&id, value)) = body.split_first() else {
            return Err(Error::Truncated {
                needed: 1,
                remaining: 0,
            });
        };

        if !is_typed(id) {
            trace!("skipping legacy object {id:#04x} ({} bytes)", value.len());
            continue;
        }
        if let Some(Width::Fixed(expected)) = object_width(id) {
            if expected != value.len() {
                return Err(Error::WidthMismatch {
                    tag: id,
                    expected,
                    found: value.len(),
                });
            }
        }
        fields.extend(DecodedField::from_object(id, value)?);
    }

    Ok(fields)
}
