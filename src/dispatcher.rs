use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::trace;

use crate::crypto;
use crate::decoder::{self, DecodedField};
use crate::device::{DeviceRegistration, DeviceSession, MacAddress};
use crate::envelope::{self, PayloadFormat};
use crate::error::{ConfigError, Error, Result};

/// One received advertisement, as handed over by the scanner.
#[derive(Debug, Clone, Copy)]
pub struct AdvertisementPacket<'a> {
    pub source_address: MacAddress,
    /// AD structures as broadcast.
    pub raw_payload: &'a [u8],
    pub rssi: i16,
}

/// Everything decoded from one accepted advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSet {
    pub address: MacAddress,
    pub rssi: i16,
    pub encrypted: bool,
    pub counter: Option<u32>,
    pub fields: Vec<DecodedField>,
}

impl ReadingSet {
    pub fn tx_power(&self) -> Option<i8> {
        self.fields.iter().find_map(|f| match f {
            DecodedField::TxPower(p) => Some(*p),
            _ => None,
        })
    }
}

/// Index of a registered device, stable for the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(usize);

/// Entry point for a BLE host: one call per observed advertisement.
///
/// `Ok(None)` means the advertisement is not for us.
pub trait AdvertisementHandler {
    fn handle(&self, packet: &AdvertisementPacket<'_>) -> Result<Option<ReadingSet>>;

    /// Authentication failures seen for `address` so far.
    fn auth_failures(&self, address: &MacAddress) -> u64;
}

#[derive(Debug)]
struct Device {
    registration: DeviceRegistration,
    session: Mutex<DeviceSession>,
    auth_failures: AtomicU64,
}

/// Routes advertisements to registered devices and tracks their replay state.
///
/// Registration needs `&mut self`; handling only needs `&self`, so a
/// configured dispatcher can be shared between threads.
#[derive(Debug, Default)]
pub struct Dispatcher {
    devices: Vec<Device>,
    by_address: HashMap<MacAddress, usize>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: DeviceRegistration) -> Result<DeviceHandle, ConfigError> {
        let address = registration.address;
        if self.by_address.contains_key(&address) {
            return Err(ConfigError::DuplicateAddress(address));
        }
        let index = self.devices.len();
        self.devices.push(Device {
            registration,
            session: Mutex::default(),
            auth_failures: AtomicU64::new(0),
        });
        self.by_address.insert(address, index);
        Ok(DeviceHandle(index))
    }

    pub fn registrations(&self) -> impl Iterator<Item = &DeviceRegistration> {
        self.devices.iter().map(|d| &d.registration)
    }

    pub fn handle_of(&self, address: &MacAddress) -> Option<DeviceHandle> {
        self.by_address.get(address).copied().map(DeviceHandle)
    }

    /// Snapshot of a device's replay state.
    pub fn session(&self, handle: DeviceHandle) -> Option<DeviceSession> {
        self.devices
            .get(handle.0)
            .map(|d| d.session.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Packets from this device that failed authentication so far.
    pub fn auth_failures(&self, handle: DeviceHandle) -> u64 {
        self.devices
            .get(handle.0)
            .map_or(0, |d| d.auth_failures.load(Ordering::Relaxed))
    }

    /// Matches, unwraps, decrypts and decodes one advertisement.
    ///
    /// The session only changes when the packet is accepted. An encrypted
    /// packet whose counter is not newer than the last accepted one is dropped
    /// before decryption.
    pub fn handle(&self, packet: &AdvertisementPacket<'_>) -> Result<Option<ReadingSet>> {
        let Some(&index) = self.by_address.get(&packet.source_address) else {
            trace!("{}: not registered", packet.source_address);
            return Ok(None);
        };
        let device = &self.devices[index];
        let address = device.registration.address;

        let mut session = device.session.lock().unwrap_or_else(PoisonError::into_inner);
        let envelope = envelope::parse(packet.raw_payload)?;
        trace!(
            "{address}: {:?} record, encrypted: {}, trigger based: {}",
            envelope.format,
            envelope.is_encrypted,
            envelope.is_trigger_based()
        );

        let sealed = envelope.counter.zip(envelope.tag);
        let mut fields = match (sealed, &device.registration.bind_key) {
            (Some(_), None) => return Err(Error::MissingKey),
            (None, Some(_)) => return Err(Error::Unencrypted),
            (Some((counter, tag)), Some(key)) => {
                session.check_counter(counter)?;
                let plaintext = crypto::decrypt(
                    key,
                    address,
                    envelope.nonce_scheme(),
                    counter,
                    envelope.payload,
                    &tag,
                )
                .inspect_err(|_| {
                    device.auth_failures.fetch_add(1, Ordering::Relaxed);
                })?;
                decode_objects(envelope.format, &plaintext)?
            }
            (None, None) => {
                let fields = decode_objects(envelope.format, envelope.payload)?;
                if let Some(id) = packet_id(&fields) {
                    session.check_packet_id(id)?;
                }
                fields
            }
        };

        match envelope.counter {
            Some(counter) => session.last_counter = Some(counter),
            None => session.last_packet_id = packet_id(&fields),
        }
        fields.extend(envelope.tx_power.map(DecodedField::TxPower));

        Ok(Some(ReadingSet {
            address,
            rssi: packet.rssi,
            encrypted: envelope.is_encrypted,
            counter: envelope.counter,
            fields,
        }))
    }
}

impl AdvertisementHandler for Dispatcher {
    fn handle(&self, packet: &AdvertisementPacket<'_>) -> Result<Option<ReadingSet>> {
        Dispatcher::handle(self, packet)
    }

    fn auth_failures(&self, address: &MacAddress) -> u64 {
        self.handle_of(address)
            .map_or(0, |handle| Dispatcher::auth_failures(self, handle))
    }
}

fn decode_objects(format: PayloadFormat, bytes: &[u8]) -> Result<Vec<DecodedField>> {
    match format {
        PayloadFormat::V2 => decoder::decode(bytes),
        PayloadFormat::V1 => decoder::decode_legacy(bytes),
    }
}

fn packet_id(fields: &[DecodedField]) -> Option<u8> {
    fields.iter().find_map(|f| match f {
        DecodedField::PacketId(id) => Some(*id),
        _ => None,
    })
}
