//! Passive decoding of BTHome advertisements from Mi thermometers running
//! custom (pvvx/ATC) firmware.
//!
//! A [`Dispatcher`] holds the registered sensors. Each advertisement handed to
//! [`Dispatcher::handle`] is matched by address, unwrapped from its BTHome
//! service data, decrypted with the sensor's bind key when needed and decoded
//! into [`DecodedField`]s. [`Listener`] adds the logging boundary and forwards
//! readings to a [`Sink`].

pub mod config;
pub mod crypto;
pub mod cursor;
pub mod decoder;
pub mod device;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod sensor;

pub use decoder::DecodedField;
pub use device::{BindKey, DeviceRegistration, DeviceSession, MacAddress};
pub use dispatcher::{AdvertisementHandler, AdvertisementPacket, DeviceHandle, Dispatcher, ReadingSet};
pub use envelope::Envelope;
pub use error::{ConfigError, Error, Result};
pub use listener::Listener;
pub use sensor::{LogSink, Publisher, Reading, ReadingKind, Sink};
