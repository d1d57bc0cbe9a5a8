use log::{debug, warn};

use crate::dispatcher::{AdvertisementHandler, AdvertisementPacket};
use crate::error::Error;
use crate::sensor::{Publisher, Sink};

/// Glue between a BLE host and a sink: dispatches each advertisement,
/// publishes accepted readings and logs dropped packets.
#[derive(Debug)]
pub struct Listener<H, S> {
    handler: H,
    publisher: Publisher,
    sink: S,
}

impl<H: AdvertisementHandler, S: Sink> Listener<H, S> {
    pub fn new(handler: H, publisher: Publisher, sink: S) -> Self {
        Self {
            handler,
            publisher,
            sink,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns whether the advertisement produced readings. Dropped packets
    /// are not retried; the sensor will advertise again.
    pub fn on_advertisement(&mut self, packet: &AdvertisementPacket<'_>) -> bool {
        let address = packet.source_address;
        match self.handler.handle(packet) {
            Ok(None) => false,
            Ok(Some(set)) => {
                debug!(
                    "{address}: accepted {} fields (encrypted: {}, counter: {:?})",
                    set.fields.len(),
                    set.encrypted,
                    set.counter
                );
                self.publisher.publish(&set, &mut self.sink);
                true
            }
            Err(Error::AuthenticationFailed) => {
                // warn on the 1st, 2nd, 4th, 8th... failure
                let failures = self.handler.auth_failures(&address);
                if failures.is_power_of_two() {
                    warn!(
                        "{address}: {failures} packet(s) failed authentication, check the bind key"
                    );
                } else {
                    debug!("{address}: packet failed authentication ({failures} so far)");
                }
                false
            }
            Err(e) => {
                debug!("{address}: dropped packet: {e}");
                false
            }
        }
    }
}
