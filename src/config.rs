use clap::{Args, Parser, Subcommand};

use crate::device::{DeviceRegistration, MacAddress};
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;
use crate::sensor::{Publisher, ReadingKind};

/// Passive listener for BTHome Mi thermometers
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan for advertisements and report readings (with watchdog restart)
    Scan(ScanArgs),
    /// Decode one captured advertisement given as hex
    Decode(DecodeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Sensor to listen for, as MAC or MAC=BINDKEY (32 hex chars). Repeatable
    #[arg(long = "device", value_name = "MAC[=BINDKEY]", required = true)]
    pub devices: Vec<DeviceRegistration>,

    /// Readings to report, comma separated [default: all]
    #[arg(long, value_enum, value_delimiter = ',')]
    pub readings: Vec<ReadingKind>,

    /// Tx power (dBm) at or above which power reads "on"
    #[arg(long, allow_negative_numbers = true)]
    pub power_threshold: Option<i8>,
}

impl DeviceArgs {
    pub fn dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        let mut dispatcher = Dispatcher::new();
        for device in &self.devices {
            dispatcher.register(device.clone())?;
        }
        Ok(dispatcher)
    }

    pub fn publisher(&self) -> Publisher {
        let publisher = if self.readings.is_empty() {
            Publisher::default()
        } else {
            Publisher::new(self.readings.iter().copied())
        };
        publisher.with_power_threshold(self.power_threshold)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub devices: DeviceArgs,

    /// Watchdog timeout in seconds (restart if no packets seen)
    #[arg(long, default_value_t = 20)]
    pub watchdog: u64,

    /// Cooldown pause between restarts in seconds
    #[arg(long, default_value_t = 5)]
    pub cooldown: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub devices: DeviceArgs,

    /// Sender of the advertisement [default: first --device]
    #[arg(long)]
    pub from: Option<MacAddress>,

    /// Signal strength to report with the readings
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub rssi: i16,

    /// Advertisement data (AD structures) as hex
    pub data: String,
}

impl DecodeArgs {
    pub fn sender(&self) -> Option<MacAddress> {
        self.from
            .or_else(|| self.devices.devices.first().map(|d| d.address))
    }
}
