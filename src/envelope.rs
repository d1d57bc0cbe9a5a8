//! Locating and unwrapping BTHome service data inside an advertisement.
//!
//! Advertisement data is a run of AD structures, `[len][type][data; len - 1]`.
//! The BTHome payload travels in a 16-bit UUID service data structure:
//!
//! - `0xFCD2`: BTHome v2, `[device info][objects]`, encrypted when bit 0 of
//!   the device info byte is set.
//! - `0x181C`: BTHome v1, plaintext objects.
//! - `0x181E`: BTHome v1, encrypted.
//!
//! Encrypted payloads end in `[counter: u32 LE][tag: 4 bytes]`.

use uuid::Uuid;

use crate::crypto::{COUNTER_LEN, NonceScheme, TAG_LEN};
use crate::cursor::Cursor;
use crate::error::{Error, Result};

pub const BTHOME_V2_UUID: u16 = 0xFCD2;
pub const BTHOME_V1_UUID: u16 = 0x181C;
pub const BTHOME_V1_ENCRYPTED_UUID: u16 = 0x181E;

const AD_TX_POWER: u8 = 0x0A;
const AD_SERVICE_DATA_16: u8 = 0x16;

const V2_ENCRYPTED: u8 = 0x01;
const V2_VERSION: u8 = 2;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    V2,
    V1,
}

/// Framing of one BTHome payload. Borrows from the advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub format: PayloadFormat,
    /// The v2 device information byte.
    pub device_info: Option<u8>,
    pub is_encrypted: bool,
    /// Present iff encrypted.
    pub counter: Option<u32>,
    /// Ciphertext when encrypted, object stream otherwise.
    pub payload: &'a [u8],
    /// Present iff encrypted.
    pub tag: Option<[u8; TAG_LEN]>,
    /// From the advertisement's Tx Power Level structure, if any.
    pub tx_power: Option<i8>,
}

impl Envelope<'_> {
    pub fn nonce_scheme(&self) -> NonceScheme {
        match self.format {
            PayloadFormat::V2 => NonceScheme::V2 {
                device_info: self.device_info.unwrap_or_default(),
            },
            PayloadFormat::V1 => NonceScheme::V1,
        }
    }

    /// v2 bit 2: the device sent this because something changed rather than
    /// on its regular interval.
    pub fn is_trigger_based(&self) -> bool {
        self.device_info.is_some_and(|info| info & 0x04 != 0)
    }
}

/// Finds the first BTHome service data structure and reads its framing.
pub fn parse(raw: &[u8]) -> Result<Envelope<'_>> {
    let mut records = Cursor::new(raw);
    let mut service = None;
    let mut tx_power = None;

    while !records.is_empty() {
        let len = records.read_u8()?;
        // zero length marks padding up to the end of the PDU
        if len == 0 {
            break;
        }
        let record = records.take(len.into())?;
        let Some((&ad_type, data)) = record.split_first() else {
            continue;
        };

        match ad_type {
            AD_SERVICE_DATA_16 if service.is_none() && data.len() >= 2 => {
                let uuid = u16::from_le_bytes([data[0], data[1]]);
                if matches!(
                    uuid,
                    BTHOME_V2_UUID | BTHOME_V1_UUID | BTHOME_V1_ENCRYPTED_UUID
                ) {
                    service = Some((uuid, &data[2..]));
                }
            }
            AD_TX_POWER => tx_power = data.first().map(|&p| p as i8),
            _ => {}
        }
    }

    let (uuid, data) = service.ok_or(Error::NoMatchingRecord)?;
    let mut envelope = match uuid {
        BTHOME_V2_UUID => parse_v2(data)?,
        BTHOME_V1_ENCRYPTED_UUID => {
            let (payload, counter, tag) = split_trailer(data)?;
            Envelope {
                format: PayloadFormat::V1,
                device_info: None,
                is_encrypted: true,
                counter: Some(counter),
                payload,
                tag: Some(tag),
                tx_power: None,
            }
        }
        _ => Envelope {
            format: PayloadFormat::V1,
            device_info: None,
            is_encrypted: false,
            counter: None,
            payload: data,
            tag: None,
            tx_power: None,
        },
    };
    envelope.tx_power = tx_power;
    Ok(envelope)
}

fn parse_v2(data: &[u8]) -> Result<Envelope<'_>> {
    let mut cursor = Cursor::new(data);
    let device_info = cursor.read_u8()?;
    let version = device_info >> 5;
    if version != V2_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let body = cursor.rest();
    if device_info & V2_ENCRYPTED == 0 {
        return Ok(Envelope {
            format: PayloadFormat::V2,
            device_info: Some(device_info),
            is_encrypted: false,
            counter: None,
            payload: body,
            tag: None,
            tx_power: None,
        });
    }

    let (payload, counter, tag) = split_trailer(body)?;
    Ok(Envelope {
        format: PayloadFormat::V2,
        device_info: Some(device_info),
        is_encrypted: true,
        counter: Some(counter),
        payload,
        tag: Some(tag),
        tx_power: None,
    })
}

/// Splits `[ciphertext][counter][tag]`.
fn split_trailer(data: &[u8]) -> Result<(&[u8], u32, [u8; TAG_LEN])> {
    let trailer = COUNTER_LEN + TAG_LEN;
    if data.len() < trailer {
        return Err(Error::Truncated {
            needed: trailer,
            remaining: data.len(),
        });
    }
    let mut cursor = Cursor::new(data);
    let ciphertext = cursor.take(data.len() - trailer)?;
    let counter = cursor.read_u32()?;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(cursor.take(TAG_LEN)?);
    Ok((ciphertext, counter, tag))
}

/// The 16-bit alias of a UUID built on the Bluetooth base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let alias = (value >> 96) as u16;
    (value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE_UUID).then_some(alias)
}

/// Serialises service data and tx power back into AD structures, for hosts
/// whose BLE stack only exposes advertisements already taken apart.
pub fn advertisement_data<'a>(
    service_data: impl IntoIterator<Item = (u16, &'a [u8])>,
    tx_power: Option<i8>,
) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(power) = tx_power {
        out.extend([2, AD_TX_POWER, power as u8]);
    }
    for (uuid, data) in service_data {
        // length byte covers type, uuid and data
        let Ok(len) = u8::try_from(data.len() + 3) else {
            continue;
        };
        out.extend([len, AD_SERVICE_DATA_16]);
        out.extend(uuid.to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_v2() {
        let raw = [
            0x02, 0x01, 0x06, // flags
            0x0A, 0x16, 0xD2, 0xFC, 0x40, 0x02, 0x34, 0x08, 0x03, 0x14, 0x0F,
        ];
        let envelope = parse(&raw).unwrap();
        assert_eq!(envelope.format, PayloadFormat::V2);
        assert!(!envelope.is_encrypted);
        assert_eq!(envelope.counter, None);
        assert_eq!(envelope.tag, None);
        assert_eq!(envelope.payload, &[0x02, 0x34, 0x08, 0x03, 0x14, 0x0F]);
    }

    #[test]
    fn encrypted_v2_trailer() {
        let raw = [
            0x0E, 0x16, 0xD2, 0xFC, 0x41, 0xAA, 0xBB, 0x05, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03,
            0x04, 0x02, 0x0A, 0xF8,
        ];
        let envelope = parse(&raw).unwrap();
        assert!(envelope.is_encrypted);
        assert_eq!(envelope.payload, &[0xAA, 0xBB]);
        assert_eq!(envelope.counter, Some(5));
        assert_eq!(envelope.tag, Some([1, 2, 3, 4]));
        assert_eq!(envelope.tx_power, Some(-8));
        assert_eq!(envelope.nonce_scheme(), NonceScheme::V2 { device_info: 0x41 });
    }

    #[test]
    fn encrypted_shorter_than_trailer() {
        let raw = [0x0A, 0x16, 0xD2, 0xFC, 0x41, 0, 0, 0, 0, 1, 2];
        assert_eq!(
            parse(&raw),
            Err(Error::Truncated {
                needed: 8,
                remaining: 6
            })
        );
    }

    #[test]
    fn legacy_uuids() {
        let plain = parse(&[0x07, 0x16, 0x1C, 0x18, 0x02, 0x00, 0x07, 0x02]).unwrap();
        assert_eq!(plain.format, PayloadFormat::V1);
        assert!(!plain.is_encrypted);

        let encrypted = parse(&[
            0x0C, 0x16, 0x1E, 0x18, 0xCC, 0x10, 0x00, 0x00, 0x00, 0x09, 0x08, 0x07, 0x06,
        ])
        .unwrap();
        assert!(encrypted.is_encrypted);
        assert_eq!(encrypted.payload, &[0xCC]);
        assert_eq!(encrypted.counter, Some(16));
        assert_eq!(encrypted.nonce_scheme(), NonceScheme::V1);
    }

    #[test]
    fn no_bthome_record() {
        assert_eq!(
            parse(&[0x02, 0x01, 0x06, 0x05, 0x16, 0x95, 0xFE, 0x01, 0x02]),
            Err(Error::NoMatchingRecord)
        );
        assert_eq!(parse(&[]), Err(Error::NoMatchingRecord));
    }

    #[test]
    fn wrong_version() {
        assert_eq!(
            parse(&[0x04, 0x16, 0xD2, 0xFC, 0x60]),
            Err(Error::UnsupportedVersion(3))
        );
    }

    #[test]
    fn record_past_end() {
        assert!(matches!(
            parse(&[0x09, 0x16, 0xD2, 0xFC, 0x40]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn padding_ends_records() {
        let raw = [0x04, 0x16, 0xD2, 0xFC, 0x40, 0x00, 0xFF, 0xFF];
        assert!(parse(&raw).unwrap().payload.is_empty());
    }

    #[test]
    fn trigger_flag() {
        let envelope = parse(&[0x04, 0x16, 0xD2, 0xFC, 0x44]).unwrap();
        assert!(envelope.is_trigger_based());
    }

    #[test]
    fn short_uuid_of_base_uuids() {
        let bthome = Uuid::from_u128(0x0000FCD2_0000_1000_8000_00805F9B34FB);
        assert_eq!(short_uuid(&bthome), Some(0xFCD2));
        assert_eq!(short_uuid(&Uuid::from_u128(1)), None);
    }

    #[test]
    fn reserialised_data_parses() {
        let raw = advertisement_data([(0xFCD2, &[0x40, 0x01, 0x64][..])], Some(4));
        let envelope = parse(&raw).unwrap();
        assert_eq!(envelope.payload, &[0x01, 0x64]);
        assert_eq!(envelope.tx_power, Some(4));
    }
}
