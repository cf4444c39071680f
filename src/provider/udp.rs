use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{FieldError, ProviderError, TelemetryProvider};

/// How long after the last datagram the link still counts as up.
pub const LINK_TIMEOUT: Duration = Duration::from_secs(1);

/// Fields pushed by a sim-side bridge as JSON datagrams, e.g.
/// `{"Throttle":0.8,"Brake":0.0,"Gear":3,...}`.
///
/// Each datagram updates the fields it names; others keep their last value.
///
/// Pedals are expected as 0.0 released to 1.0 fully pressed, clutch included.
/// Bridges that forward a sim's raw clutch axis where 1.0 means released
/// (iRacing's `Clutch`) should be paired with `invert_clutch` in the settings.
pub struct UdpProvider {
    bind: SocketAddr,
    fields: Arc<DashMap<String, Value>>,
    last_packet: Arc<Mutex<Option<Instant>>>,
    stop: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpProvider {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            fields: Arc::new(DashMap::new()),
            last_packet: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            receiver: None,
        }
    }

    fn value(&self, field: &str) -> Result<Value, FieldError> {
        self.fields
            .get(field)
            .map(|v| v.value().clone())
            .ok_or_else(|| FieldError::Missing(field.to_string()))
    }
}

/// Merge one datagram into the field map. Returns how many fields it set.
pub(crate) fn apply_datagram(fields: &DashMap<String, Value>, payload: &[u8]) -> Result<usize, serde_json::Error> {
    let map: Map<String, Value> = serde_json::from_slice(payload)?;
    let n = map.len();
    for (k, v) in map {
        fields.insert(k, v);
    }
    Ok(n)
}

impl TelemetryProvider for UdpProvider {
    fn start(&mut self) -> Result<(), ProviderError> {
        let socket = UdpSocket::bind(self.bind).map_err(|source| ProviderError::Bind { addr: self.bind, source })?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        info!(bind = %self.bind, "Listening for telemetry datagrams");

        self.stop.store(false, Ordering::Relaxed);
        let stop = self.stop.clone();
        let fields = Arc::clone(&self.fields);
        let last_packet = Arc::clone(&self.last_packet);
        self.receiver = Some(thread::spawn(move || {
            let mut buf = [0u8; 8192];
            while !stop.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((n, from)) => match apply_datagram(&fields, &buf[..n]) {
                        Ok(count) => {
                            *last_packet.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                            debug!(%from, count, "Telemetry datagram");
                        }
                        Err(e) => warn!(?e, %from, "Ignoring malformed telemetry datagram"),
                    },
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!(?e, "Telemetry socket error");
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        self.fields.clear();
        *self.last_packet.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_connected(&self) -> bool {
        self.last_packet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed() <= LINK_TIMEOUT)
            .unwrap_or(false)
    }

    fn get_float(&self, field: &str) -> Result<f32, FieldError> {
        self.value(field)?
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| FieldError::WrongType { field: field.to_string() })
    }

    fn get_int(&self, field: &str) -> Result<i32, FieldError> {
        let v = self
            .value(field)?
            .as_i64()
            .ok_or_else(|| FieldError::WrongType { field: field.to_string() })?;
        i32::try_from(v).map_err(|_| FieldError::OutOfRange { field: field.to_string(), value: v })
    }
}

impl Drop for UdpProvider {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fields;

    #[test]
    fn datagram_updates_named_fields_only() {
        let map = DashMap::new();
        assert_eq!(apply_datagram(&map, br#"{"Throttle":0.5,"Gear":3}"#).unwrap(), 2);
        assert_eq!(apply_datagram(&map, br#"{"Throttle":0.25}"#).unwrap(), 1);
        assert_eq!(map.get("Throttle").unwrap().as_f64(), Some(0.25));
        assert_eq!(map.get("Gear").unwrap().as_i64(), Some(3));
        assert!(apply_datagram(&map, b"[1,2,3]").is_err());
        assert!(apply_datagram(&map, b"garbage").is_err());
    }

    #[test]
    fn typed_field_errors() {
        let p = UdpProvider::new("127.0.0.1:0".parse().unwrap());
        apply_datagram(&p.fields, br#"{"Brake":"hard","Gear":9999999999,"Speed":12}"#).unwrap();
        assert_eq!(p.get_float(fields::THROTTLE), Err(FieldError::Missing("Throttle".into())));
        assert!(matches!(p.get_float(fields::BRAKE), Err(FieldError::WrongType { .. })));
        assert!(matches!(p.get_int(fields::GEAR), Err(FieldError::OutOfRange { .. })));
        assert_eq!(p.get_float(fields::SPEED), Ok(12.0));
        assert!(!p.is_connected());
    }

    #[test]
    fn clutch_polarity_is_left_to_settings() {
        let p = UdpProvider::new("127.0.0.1:0".parse().unwrap());
        apply_datagram(&p.fields, br#"{"Clutch":1.0,"ClutchPedal":0.0}"#).unwrap();
        assert_eq!(p.get_float("Clutch"), Ok(1.0));
        assert_eq!(p.get_float("ClutchPedal"), Ok(0.0));
    }

    #[test]
    fn receives_datagrams_over_loopback() {
        // grab a free port, then hand it to the provider
        let free = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = free.local_addr().unwrap();
        drop(free);

        let mut p = UdpProvider::new(addr);
        p.start().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while !p.is_connected() && Instant::now() < deadline {
            sender.send_to(br#"{"Throttle":0.75,"Gear":-1}"#, addr).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert!(p.is_connected());
        assert_eq!(p.get_float(fields::THROTTLE), Ok(0.75));
        assert_eq!(p.get_int(fields::GEAR), Ok(-1));
        p.stop();
        assert!(!p.is_connected());
    }
}
