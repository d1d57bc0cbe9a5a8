use std::collections::BTreeSet;
use std::fmt;

use clap::ValueEnum;
use log::info;

use crate::decoder::DecodedField;
use crate::device::MacAddress;
use crate::dispatcher::ReadingSet;

/// The readings a user can choose to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum ReadingKind {
    Temperature,
    Humidity,
    BatteryLevel,
    BatteryVoltage,
    SignalStrength,
    Power,
}

/// A value ready for the reporting layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Temperature(f32),
    Humidity(f32),
    BatteryLevel(u8),
    BatteryVoltage(f32),
    SignalStrength(i16),
    Power(bool),
}

impl Reading {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::Temperature(_) => ReadingKind::Temperature,
            Self::Humidity(_) => ReadingKind::Humidity,
            Self::BatteryLevel(_) => ReadingKind::BatteryLevel,
            Self::BatteryVoltage(_) => ReadingKind::BatteryVoltage,
            Self::SignalStrength(_) => ReadingKind::SignalStrength,
            Self::Power(_) => ReadingKind::Power,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature(t) => write!(f, "Temperature: {t:.2} °C"),
            Self::Humidity(h) => write!(f, "Humidity: {h:.2} %"),
            Self::BatteryLevel(b) => write!(f, "Battery level: {b} %"),
            Self::BatteryVoltage(v) => write!(f, "Battery voltage: {v:.3} V"),
            Self::SignalStrength(rssi) => write!(f, "Signal strength: {rssi} dBm"),
            Self::Power(on) => write!(f, "Power: {}", if *on { "on" } else { "off" }),
        }
    }
}

/// Receives one update per exposed reading.
pub trait Sink {
    fn publish(&mut self, address: MacAddress, reading: Reading);
}

/// Writes readings to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn publish(&mut self, address: MacAddress, reading: Reading) {
        info!("{address} {reading}");
    }
}

/// In-memory sink: keeps every reading in arrival order, for embedders that
/// poll instead of reacting.
impl Sink for Vec<(MacAddress, Reading)> {
    fn publish(&mut self, address: MacAddress, reading: Reading) {
        self.push((address, reading));
    }
}

/// Turns decoded fields into readings and forwards the enabled ones.
#[derive(Debug, Clone)]
pub struct Publisher {
    enabled: BTreeSet<ReadingKind>,
    power_threshold: Option<i8>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(ReadingKind::value_variants().iter().copied())
    }
}

impl Publisher {
    pub fn new(enabled: impl IntoIterator<Item = ReadingKind>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
            power_threshold: None,
        }
    }

    /// Power reads "on" when tx power is at least `threshold` dBm. Without a
    /// threshold any advertised tx power counts as on.
    pub fn with_power_threshold(mut self, threshold: Option<i8>) -> Self {
        self.power_threshold = threshold;
        self
    }

    pub fn is_enabled(&self, kind: ReadingKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Every reading derivable from `set`, enabled or not.
    pub fn readings(&self, set: &ReadingSet) -> Vec<Reading> {
        let mut readings: Vec<Reading> = set
            .fields
            .iter()
            .filter_map(|field| match *field {
                DecodedField::Temperature(t) => Some(Reading::Temperature(t)),
                DecodedField::Humidity(h) => Some(Reading::Humidity(h)),
                DecodedField::BatteryLevel(b) => Some(Reading::BatteryLevel(b)),
                DecodedField::BatteryVoltage(v) => Some(Reading::BatteryVoltage(v)),
                DecodedField::TxPower(_) | DecodedField::PacketId(_) => None,
            })
            .collect();
        readings.extend(set.tx_power().map(|p| {
            Reading::Power(self.power_threshold.is_none_or(|threshold| p >= threshold))
        }));
        readings.push(Reading::SignalStrength(set.rssi));
        readings
    }

    /// Forwards the enabled readings, returning how many were sent.
    pub fn publish(&self, set: &ReadingSet, sink: &mut dyn Sink) -> usize {
        let mut sent = 0;
        for reading in self.readings(set) {
            if self.is_enabled(reading.kind()) {
                sink.publish(set.address, reading);
                sent += 1;
            }
        }
        sent
    }
}
