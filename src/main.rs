use anyhow::{Context, bail};
use bluer::{Adapter, AdapterEvent, Address};
use bthome_mitemp::config::{Cli, Command, DecodeArgs, ScanArgs};
use bthome_mitemp::envelope::{advertisement_data, short_uuid};
use bthome_mitemp::{AdvertisementPacket, Dispatcher, Listener, LogSink, MacAddress, Sink};
use clap::Parser;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Scan(args) => scan(args).await,
        Command::Decode(args) => decode(args),
    }
}

fn decode(args: DecodeArgs) -> anyhow::Result<()> {
    let dispatcher = args.devices.dispatcher()?;
    let publisher = args.devices.publisher();
    let raw = hex::decode(args.data.trim()).context("advertisement data is not hex")?;
    let Some(source_address) = args.sender() else {
        bail!("no sender address");
    };

    let packet = AdvertisementPacket {
        source_address,
        raw_payload: &raw,
        rssi: args.rssi,
    };
    match dispatcher.handle(&packet)? {
        Some(set) => {
            for field in &set.fields {
                debug!("{source_address} {field}");
            }
            publisher.publish(&set, &mut LogSink);
            Ok(())
        }
        None => bail!("{source_address} is not a registered device"),
    }
}

async fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let dispatcher = args.devices.dispatcher()?;
    for device in dispatcher.registrations() {
        info!(
            "Listening for {} ({})",
            device.address,
            if device.bind_key.is_some() { "encrypted" } else { "plaintext" }
        );
    }
    let mut listener = Listener::new(dispatcher, args.devices.publisher(), LogSink);

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(
        "Starting continuous BLE discovery on {} (watchdog={}s, cooldown={}s)...",
        adapter.name(),
        args.watchdog,
        args.cooldown
    );

    let last_ble_packet = Arc::new(Mutex::new(Instant::now()));
    let (tx, mut rx) = mpsc::unbounded_channel::<Address>();

    // Discovery + watchdog task
    {
        let adapter = adapter.clone();
        let last_ble_packet = last_ble_packet.clone();
        let watchdog = args.watchdog;
        let cooldown = args.cooldown;

        tokio::spawn(async move {
            let mut restart_counter: u64 = 1;

            loop {
                debug!("(Re)starting discovery...");
                // property changes of known devices are reported as DeviceAdded too
                let mut events = match adapter.discover_devices_with_changes().await {
                    Ok(ev) => ev,
                    Err(e) => {
                        error!("Failed to start discovery: {e}");
                        sleep(Duration::from_secs(cooldown)).await;
                        continue;
                    }
                };

                loop {
                    tokio::select! {
                        evt = events.next() => {
                            match evt {
                                Some(AdapterEvent::DeviceAdded(addr)) => {
                                    let _ = tx.send(addr);
                                }
                                Some(_) => {}
                                None => {
                                    warn!("Discovery stream ended, restarting...");
                                    break;
                                }
                            }
                        }

                        _ = sleep(Duration::from_secs(5)) => {
                            let elapsed = last_ble_packet.lock().await.elapsed();
                            if elapsed > Duration::from_secs(watchdog) {
                                warn!(
                                    "Watchdog: no sensor packets for {:?}, restarting discovery (count {})...",
                                    elapsed, restart_counter
                                );
                                restart_counter += 1;

                                drop(events);
                                sleep(Duration::from_secs(cooldown)).await;
                                break;
                            }
                        }
                    }
                }

                sleep(Duration::from_secs(2)).await;
            }
        });
    }

    // Advertisements are handled one at a time, in arrival order.
    while let Some(addr) = rx.recv().await {
        let source_address = MacAddress::from(addr.0);
        if listener.handler().handle_of(&source_address).is_none() {
            continue;
        }
        match handle_device(&adapter, addr, &mut listener).await {
            Ok(true) => *last_ble_packet.lock().await = Instant::now(),
            Ok(false) => {}
            Err(e) => warn!("Error reading {addr}: {e}"),
        }
    }

    Ok(())
}

/// Rebuilds the advertisement from BlueZ's cached properties and feeds it to
/// the listener.
async fn handle_device<S: Sink>(
    adapter: &Adapter,
    addr: Address,
    listener: &mut Listener<Dispatcher, S>,
) -> bluer::Result<bool> {
    let device = adapter.device(addr)?;
    let rssi = device.rssi().await?.unwrap_or(0);
    let tx_power = device
        .tx_power()
        .await?
        .and_then(|p| i8::try_from(p).ok());
    let Some(service_data) = device.service_data().await? else {
        return Ok(false);
    };

    let raw = advertisement_data(
        service_data
            .iter()
            .filter_map(|(uuid, data)| Some((short_uuid(uuid)?, data.as_slice()))),
        tx_power,
    );
    debug!("{addr} RSSI={rssi} data={}", hex::encode(&raw));

    let packet = AdvertisementPacket {
        source_address: MacAddress::from(addr.0),
        raw_payload: &raw,
        rssi,
    };
    Ok(listener.on_advertisement(&packet))
}
