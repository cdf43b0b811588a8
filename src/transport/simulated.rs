//! Simulated sonar sensor.
//!
//! Produces valid 18-byte frames at a fixed rate from a slowly drifting
//! bottom profile, so the whole pipeline can be exercised without hardware.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{DeviceId, DisconnectReason, EventSink, Transport};
use crate::error::TransportError;
use crate::protocol::frame::{checksum, FRAME_LEN, SIGNATURE};
use crate::protocol::COMMAND_LEN;

/// Synthetic sensor backend.
#[derive(Debug)]
pub struct SimulatedTransport {
    interval: Duration,
    seed: u64,
    link: Mutex<Option<Link>>,
    last_command: Mutex<Option<[u8; COMMAND_LEN]>>,
}

#[derive(Debug)]
struct Link {
    sink: EventSink,
    pinger: JoinHandle<()>,
}

impl SimulatedTransport {
    /// A sensor pinging at `rate_hz`.
    pub fn new(rate_hz: f64) -> Self {
        let interval = Duration::from_secs_f64(1.0 / rate_hz.max(0.1));
        Self {
            interval,
            seed: 0x5EED,
            link: Mutex::new(None),
            last_command: Mutex::new(None),
        }
    }

    /// Use a fixed RNG seed for reproducible output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The last configuration command received.
    pub fn last_command(&self) -> Option<[u8; COMMAND_LEN]> {
        *lock(&self.last_command)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Random-walk model of the water column under the boat.
struct Profile {
    rng: StdRng,
    depth_ft: f64,
    temperature_f: f64,
    battery: u8,
    pings: u64,
}

impl Profile {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            depth_ft: 18.0,
            temperature_f: 61.0,
            battery: 6,
            pings: 0,
        }
    }

    fn next_frame(&mut self) -> [u8; FRAME_LEN] {
        self.pings += 1;
        self.depth_ft = (self.depth_ft + self.rng.gen_range(-0.6..0.6)).clamp(2.0, 250.0);
        self.temperature_f += self.rng.gen_range(-0.05..0.05);
        if self.pings % 3000 == 0 && self.battery > 0 {
            self.battery -= 1;
        }

        let fish = self.rng.gen_bool(0.05);
        let fish_ft = if fish {
            self.rng.gen_range(1.0..self.depth_ft)
        } else {
            0.0
        };
        let fish_nibble = if fish { self.rng.gen_range(1u8..=15) } else { 0 };
        let bottom = self.rng.gen_range(90u8..=230);

        let (depth_whole, depth_frac) = split_fixed(self.depth_ft);
        let (fish_whole, fish_frac) = split_fixed(fish_ft);
        let (temp_whole, temp_frac) = split_fixed(self.temperature_f);

        let mut frame = [0u8; FRAME_LEN];
        frame[0..2].copy_from_slice(&SIGNATURE);
        frame[6] = depth_whole;
        frame[7] = depth_frac;
        frame[8] = bottom;
        frame[9] = fish_whole;
        frame[10] = fish_frac;
        frame[11] = (self.battery << 4) | fish_nibble;
        frame[12] = temp_whole;
        frame[13] = temp_frac;
        frame[17] = checksum(&frame[..FRAME_LEN - 1]);
        frame
    }
}

/// Whole units and hundredths, saturating at the u8 range.
fn split_fixed(value: f64) -> (u8, u8) {
    let clamped = value.clamp(0.0, 255.99);
    let whole = clamped.trunc();
    let hundredths = ((clamped - whole) * 100.0).round().min(99.0);
    (whole as u8, hundredths as u8)
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self, device: &DeviceId, events: EventSink) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if let Some(old) = link.take() {
            old.pinger.abort();
        }

        events.connecting();
        events.connected();
        events.ready();

        let sink = events.clone();
        let interval = self.interval;
        let seed = self.seed;
        let pinger = tokio::spawn(async move {
            let mut profile = Profile::new(seed);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !sink.notify(profile.next_frame().to_vec()) {
                    break;
                }
            }
        });

        info!(device = %device, interval = ?self.interval, "Simulated sensor connected");
        *link = Some(Link {
            sink: events,
            pinger,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let link = lock(&self.link).take();
        match link {
            Some(link) => {
                link.sink.disconnecting();
                link.pinger.abort();
                link.sink.disconnected(DisconnectReason::Requested);
                info!("Simulated sensor disconnected");
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if lock(&self.link).is_none() {
            return Err(TransportError::NotConnected);
        }
        let command: [u8; COMMAND_LEN] = bytes
            .try_into()
            .map_err(|_| TransportError::SendFailed(format!("bad command length {}", bytes.len())))?;
        debug!(command = ?command, "Simulated sensor received command");
        *lock(&self.last_command) = Some(command);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        if let Some(link) = lock(&self.link).take() {
            link.pinger.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::transport::TransportEvent;

    #[test]
    fn test_profile_frames_decode() {
        let mut profile = Profile::new(7);
        for _ in 0..500 {
            let frame = profile.next_frame();
            let reading = decode(&frame).unwrap();
            assert!(reading.depth_m > 0.5);
            assert!(reading.battery_pct <= 100);
        }
    }

    #[test]
    fn test_split_fixed() {
        assert_eq!(split_fixed(10.5), (10, 50));
        assert_eq!(split_fixed(-3.0), (0, 0));
        assert_eq!(split_fixed(300.0), (255, 99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_notifications_until_disconnect() {
        let transport = SimulatedTransport::new(10.0);
        let (sink, mut rx) = EventSink::channel();
        transport.connect(&DeviceId::new("sim"), sink).await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Connecting));
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(rx.recv().await, Some(TransportEvent::Ready));
        for _ in 0..3 {
            match rx.recv().await {
                Some(TransportEvent::Notification(bytes)) => assert_eq!(bytes.len(), FRAME_LEN),
                other => panic!("unexpected event {other:?}"),
            }
        }

        transport.send(&[0u8; COMMAND_LEN]).await.unwrap();
        assert!(transport.last_command().is_some());
        assert!(transport.send(&[0u8; 3]).await.is_err());

        transport.disconnect().await.unwrap();
        let mut saw_disconnected = false;
        while let Some(event) = rx.recv().await {
            if event == TransportEvent::Disconnected(DisconnectReason::Requested) {
                saw_disconnected = true;
                break;
            }
        }
        assert!(saw_disconnected);
        assert!(transport.disconnect().await.is_err());
    }
}
