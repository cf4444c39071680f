use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::provider::{fields, Connector, TelemetryProvider};
use crate::settings::SharedSettings;

/// One synchronized reading of every channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since the source was created.
    pub timestamp: f64,
    pub throttle: f64,
    pub brake: f64,
    pub clutch: f64,
    /// Fraction of the configured half-range, -1..1.
    pub steering_pct: f64,
    pub gear: i32,
    /// Display units (see `SpeedUnit`).
    pub speed: f64,
}

pub type SampleCallback = Box<dyn Fn(Sample) + Send + Sync>;
pub type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Wheel angle as a fraction of half the lock-to-lock range.
pub fn steering_fraction(angle_deg: f64, range_deg: f64) -> f64 {
    let half_range = (range_deg * 0.5).max(10.0);
    (angle_deg / half_range).clamp(-1.0, 1.0)
}

struct Link {
    provider: Box<dyn TelemetryProvider>,
    since: Instant,
}

struct SourceInner {
    connector: Connector,
    link: Mutex<Option<Link>>,
    last_sample: Mutex<Option<Instant>>,
    connected: AtomicBool,
    polling: AtomicBool,
    session_start: Instant,
    settings: Arc<SharedSettings>,
    on_sample: SampleCallback,
    on_connection: ConnectionCallback,
}

/// Polls a telemetry provider on a fast tick and watches the link on a slow
/// one. Every successful poll yields one [`Sample`] through the sample
/// callback; connect/disconnect transitions go through the connection
/// callback, once per transition.
pub struct SampleSource {
    inner: Arc<SourceInner>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl SampleSource {
    pub fn new(
        connector: Connector,
        settings: Arc<SharedSettings>,
        on_sample: SampleCallback,
        on_connection: ConnectionCallback,
    ) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                connector,
                link: Mutex::new(None),
                last_sample: Mutex::new(None),
                connected: AtomicBool::new(false),
                polling: AtomicBool::new(false),
                session_start: Instant::now(),
                settings,
                on_sample,
                on_connection,
            }),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Connect right away, then run the poll and liveness loops until
    /// [`stop`](Self::stop).
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        self.stop.store(false, Ordering::Relaxed);
        self.inner.ensure_link(Instant::now());

        let timings = self.inner.settings.timings();
        info!(
            poll_ms = timings.poll_ms,
            liveness_ms = timings.liveness_ms,
            staleness_secs = timings.staleness_secs,
            "Starting sample source"
        );

        let inner = Arc::clone(&self.inner);
        let stop = self.stop.clone();
        self.workers.push(spawn_ticker("poll", timings.poll_interval(), stop, move || {
            inner.poll_once();
        }));

        let inner = Arc::clone(&self.inner);
        let stop = self.stop.clone();
        self.workers.push(spawn_ticker("liveness", timings.liveness_interval(), stop, move || {
            inner.check_liveness_at(Instant::now());
        }));
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Sample source worker panicked");
            }
        }
        let mut link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut l) = link.take() {
            l.provider.stop();
        }
    }

    /// One poll. Returns the published sample, if any.
    pub fn poll_once(&self) -> Option<Sample> {
        self.inner.poll_once()
    }

    pub fn check_liveness(&self) {
        self.inner.check_liveness_at(Instant::now());
    }

    pub fn check_liveness_at(&self, now: Instant) {
        self.inner.check_liveness_at(now);
    }
}

impl Drop for SampleSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `job` on every tick of `interval` until `stop` is set. The tick
/// channel holds at most one pending tick, so a slow job drops ticks rather
/// than queueing them.
fn spawn_ticker(
    name: &'static str,
    interval: Duration,
    stop: Arc<AtomicBool>,
    job: impl Fn() + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let ticks = channel::tick(interval);
        while !stop.load(Ordering::Relaxed) {
            match ticks.recv_timeout(Duration::from_millis(200)) {
                Ok(_) => job(),
                Err(channel::RecvTimeoutError::Timeout) => {}
                Err(channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(worker = name, "Ticker stopped");
    })
}

impl SourceInner {
    fn poll_once(&self) -> Option<Sample> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous poll still in flight, skipping tick");
            return None;
        }
        let sample = {
            // liveness must not tear the link down between the read and the
            // connected transition
            let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            let sample = link.as_ref().and_then(|l| self.read_sample(l.provider.as_ref()));
            if sample.is_some() {
                *self.last_sample.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                self.set_connected(true);
            }
            sample
        };
        self.polling.store(false, Ordering::Release);

        let sample = sample?;
        (self.on_sample)(sample);
        Some(sample)
    }

    fn read_sample(&self, provider: &dyn TelemetryProvider) -> Option<Sample> {
        if !provider.is_connected() {
            return None;
        }

        let float = |field: &str| -> f64 {
            match provider.get_float(field) {
                Ok(v) => f64::from(v),
                Err(e) => {
                    debug!(error = %e, "Field read failed, using zero");
                    0.0
                }
            }
        };
        let throttle = float(fields::THROTTLE);
        let brake = float(fields::BRAKE);
        let steer_rad = float(fields::STEERING_WHEEL_ANGLE);
        let clutch = fields::CLUTCH_CANDIDATES
            .iter()
            .find_map(|name| provider.get_float(name).ok())
            .map(f64::from)
            .unwrap_or(0.0);
        let speed_mps = float(fields::SPEED);
        let gear = provider.get_int(fields::GEAR).unwrap_or_else(|e| {
            debug!(error = %e, "Gear read failed, using neutral");
            0
        });

        let range = self.settings.steering_range_deg();
        Some(Sample {
            timestamp: self.session_start.elapsed().as_secs_f64(),
            throttle,
            brake,
            clutch,
            steering_pct: steering_fraction(steer_rad.to_degrees(), range),
            gear,
            speed: speed_mps * self.settings.speed_unit().factor(),
        })
    }

    fn ensure_link(&self, now: Instant) {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        if link.is_some() {
            return;
        }
        let created = (self.connector)().and_then(|mut provider| {
            provider.start()?;
            Ok(provider)
        });
        match created {
            Ok(provider) => {
                debug!("Telemetry provider started");
                *link = Some(Link { provider, since: now });
            }
            Err(e) => warn!(error = ?e, "Telemetry provider unavailable, retrying"),
        }
    }

    fn check_liveness_at(&self, now: Instant) {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = link.as_ref() else {
            drop(link);
            self.ensure_link(now);
            return;
        };

        let last_sample = *self.last_sample.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh_since = match last_sample {
            Some(t) if t > current.since => t,
            _ => current.since,
        };
        let staleness = self.settings.timings().staleness();
        if now.saturating_duration_since(fresh_since) <= staleness {
            return;
        }

        info!(stale_for = ?now.saturating_duration_since(fresh_since), "Telemetry went stale, dropping provider");
        if let Some(mut stale) = link.take() {
            stale.provider.stop();
        }
        drop(link);
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) != connected {
            info!(connected, "Telemetry connection changed");
            (self.on_connection)(connected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FieldError, ProviderError};
    use crate::settings::Settings;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Shared script for the fake provider: field values and link status.
    #[derive(Default)]
    struct Script {
        floats: HashMap<String, f32>,
        ints: HashMap<String, i32>,
        connected: bool,
    }

    struct ScriptedProvider {
        script: Arc<Mutex<Script>>,
    }

    impl TelemetryProvider for ScriptedProvider {
        fn start(&mut self) -> Result<(), ProviderError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn is_connected(&self) -> bool {
            self.script.lock().unwrap().connected
        }
        fn get_float(&self, field: &str) -> Result<f32, FieldError> {
            self.script.lock().unwrap().floats.get(field).copied().ok_or_else(|| FieldError::Missing(field.into()))
        }
        fn get_int(&self, field: &str) -> Result<i32, FieldError> {
            self.script.lock().unwrap().ints.get(field).copied().ok_or_else(|| FieldError::Missing(field.into()))
        }
    }

    struct Harness {
        source: SampleSource,
        script: Arc<Mutex<Script>>,
        samples: Arc<Mutex<Vec<Sample>>>,
        transitions: Arc<Mutex<Vec<bool>>>,
        connects: Arc<AtomicUsize>,
    }

    fn harness(settings: Settings) -> Harness {
        let script = Arc::new(Mutex::new(Script { connected: true, ..Script::default() }));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let connects = Arc::new(AtomicUsize::new(0));

        let script_c = Arc::clone(&script);
        let connects_c = Arc::clone(&connects);
        let connector: Connector = Box::new(move || {
            connects_c.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedProvider { script: Arc::clone(&script_c) }) as Box<dyn TelemetryProvider>)
        });
        let samples_c = Arc::clone(&samples);
        let transitions_c = Arc::clone(&transitions);
        let source = SampleSource::new(
            connector,
            Arc::new(SharedSettings::new(settings, None)),
            Box::new(move |s: Sample| samples_c.lock().unwrap().push(s)),
            Box::new(move |c: bool| transitions_c.lock().unwrap().push(c)),
        );
        Harness { source, script, samples, transitions, connects }
    }

    fn set_float(h: &Harness, field: &str, v: f32) {
        h.script.lock().unwrap().floats.insert(field.into(), v);
    }

    #[test]
    fn poll_without_provider_is_noop() {
        let h = harness(Settings::default());
        assert!(h.source.poll_once().is_none());
        assert!(h.samples.lock().unwrap().is_empty());
        assert!(h.transitions.lock().unwrap().is_empty());
    }

    #[test]
    fn poll_without_link_yields_nothing_and_no_transition() {
        let h = harness(Settings::default());
        h.source.check_liveness();
        h.script.lock().unwrap().connected = false;
        assert!(h.source.poll_once().is_none());
        assert!(h.transitions.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let h = harness(Settings::default());
        h.source.check_liveness();
        set_float(&h, fields::THROTTLE, 0.73);
        let s = h.source.poll_once().unwrap();
        assert!((s.throttle - 0.73).abs() < 1e-6);
        assert_eq!(s.brake, 0.0);
        assert_eq!(s.clutch, 0.0);
        assert_eq!(s.steering_pct, 0.0);
        assert_eq!(s.speed, 0.0);
        assert_eq!(s.gear, 0);
        assert_eq!(h.samples.lock().unwrap().len(), 1);
    }

    #[test]
    fn clutch_uses_first_available_candidate() {
        let h = harness(Settings::default());
        h.source.check_liveness();
        set_float(&h, "ClutchPedal", 0.4);
        set_float(&h, "ClutchAxis", 0.9);
        let s = h.source.poll_once().unwrap();
        assert!((s.clutch - 0.4).abs() < 1e-6);

        set_float(&h, "Clutch", 0.1);
        let s = h.source.poll_once().unwrap();
        assert!((s.clutch - 0.1).abs() < 1e-6);
    }

    #[test]
    fn connection_notified_once_per_transition() {
        let h = harness(Settings::default());
        h.source.check_liveness();
        for _ in 0..10 {
            assert!(h.source.poll_once().is_some());
        }
        assert_eq!(*h.transitions.lock().unwrap(), vec![true]);
        assert!(h.source.is_connected());
    }

    #[test]
    fn stale_link_is_dropped_and_reconnected() {
        let h = harness(Settings::default());
        let t0 = Instant::now();
        h.source.check_liveness_at(t0);
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        h.source.poll_once().unwrap();

        // within the threshold nothing happens
        h.source.check_liveness_at(Instant::now() + Duration::from_secs(7));
        assert_eq!(*h.transitions.lock().unwrap(), vec![true]);

        h.source.check_liveness_at(Instant::now() + Duration::from_secs(9));
        assert_eq!(*h.transitions.lock().unwrap(), vec![true, false]);
        assert!(!h.source.is_connected());
        // torn down: polls are no-ops until the next liveness check
        assert!(h.source.poll_once().is_none());

        h.source.check_liveness();
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
        h.source.poll_once().unwrap();
        assert_eq!(*h.transitions.lock().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn fresh_link_without_samples_gets_full_grace_period() {
        let h = harness(Settings::default());
        let t0 = Instant::now();
        h.script.lock().unwrap().connected = false;
        h.source.check_liveness_at(t0);
        h.source.check_liveness_at(t0 + Duration::from_secs(4));
        assert_eq!(h.connects.load(Ordering::SeqCst), 1);
        // never connected, so the teardown raises no notification
        h.source.check_liveness_at(t0 + Duration::from_secs(9));
        assert!(h.transitions.lock().unwrap().is_empty());
        h.source.check_liveness_at(t0 + Duration::from_secs(10));
        assert_eq!(h.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn steering_maps_against_half_range() {
        assert_eq!(steering_fraction(270.0, 540.0), 1.0);
        assert_eq!(steering_fraction(540.0, 540.0), 1.0);
        assert_eq!(steering_fraction(-900.0, 540.0), -1.0);
        assert_eq!(steering_fraction(135.0, 540.0), 0.5);
        // tiny ranges are floored at 10 degrees of half-range
        assert_eq!(steering_fraction(5.0, 4.0), 0.5);
    }

    #[test]
    fn steering_and_speed_are_converted() {
        let h = harness(Settings::default());
        h.source.check_liveness();
        set_float(&h, fields::STEERING_WHEEL_ANGLE, 135f32.to_radians());
        set_float(&h, fields::SPEED, 10.0);
        h.script.lock().unwrap().ints.insert(fields::GEAR.into(), -1);
        let s = h.source.poll_once().unwrap();
        assert!((s.steering_pct - 0.5).abs() < 1e-6);
        assert!((s.speed - 22.3693629).abs() < 1e-4);
        assert_eq!(s.gear, -1);

        set_float(&h, fields::STEERING_WHEEL_ANGLE, 540f32.to_radians());
        assert_eq!(h.source.poll_once().unwrap().steering_pct, 1.0);
    }

    #[test]
    fn unavailable_provider_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_c = Arc::clone(&attempts);
        let connector: Connector = Box::new(move || {
            attempts_c.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Unavailable("sim not running".into()))
        });
        let source = SampleSource::new(
            connector,
            Arc::new(SharedSettings::new(Settings::default(), None)),
            Box::new(|_: Sample| {}),
            Box::new(|_: bool| {}),
        );
        source.check_liveness();
        source.check_liveness();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(source.poll_once().is_none());
    }

    /// Blocks inside the throttle read until released.
    struct GatedProvider {
        entered: channel::Sender<()>,
        release: channel::Receiver<()>,
    }

    impl TelemetryProvider for GatedProvider {
        fn start(&mut self) -> Result<(), ProviderError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn get_float(&self, field: &str) -> Result<f32, FieldError> {
            if field == fields::THROTTLE {
                let _ = self.entered.send(());
                let _ = self.release.recv_timeout(Duration::from_secs(5));
                return Ok(0.5);
            }
            Err(FieldError::Missing(field.into()))
        }
        fn get_int(&self, field: &str) -> Result<i32, FieldError> {
            Err(FieldError::Missing(field.into()))
        }
    }

    #[test]
    fn overlapping_poll_is_skipped() {
        let (entered_tx, entered_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded(1);
        let connector: Connector = Box::new(move || {
            Ok(Box::new(GatedProvider { entered: entered_tx.clone(), release: release_rx.clone() })
                as Box<dyn TelemetryProvider>)
        });
        let samples = Arc::new(Mutex::new(Vec::new()));
        let samples_c = Arc::clone(&samples);
        let source = SampleSource::new(
            connector,
            Arc::new(SharedSettings::new(Settings::default(), None)),
            Box::new(move |s: Sample| samples_c.lock().unwrap().push(s)),
            Box::new(|_: bool| {}),
        );
        source.check_liveness();

        thread::scope(|scope| {
            let first = scope.spawn(|| source.poll_once());
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            assert!(source.poll_once().is_none());
            assert!(samples.lock().unwrap().is_empty());

            release_tx.send(()).unwrap();
            let published = first.join().unwrap().unwrap();
            assert!((published.throttle - 0.5).abs() < 1e-6);
        });
        assert_eq!(samples.lock().unwrap().len(), 1);
    }

    #[test]
    fn teardown_racing_polls_ends_disconnected() {
        let h = harness(Settings::default());
        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    h.source.poll_once();
                }
            });
            for _ in 0..200 {
                h.source.check_liveness();
                h.source.check_liveness_at(Instant::now() + Duration::from_secs(60));
            }
            done.store(true, Ordering::Relaxed);
        });
        assert!(h.source.inner.link.lock().unwrap().is_none());
        assert!(!h.source.is_connected());
        assert_ne!(h.transitions.lock().unwrap().last(), Some(&true));
    }

    #[test]
    fn huge_staleness_setting_keeps_liveness_running() {
        let settings = Settings::from_json(r#"{"timings": {"staleness_secs": 1e30}}"#).unwrap();
        let h = harness(settings);
        h.source.check_liveness();
        h.source.poll_once().unwrap();
        h.source.check_liveness();
        h.source.check_liveness_at(Instant::now() + Duration::from_secs(3601));
        assert_eq!(*h.transitions.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn background_threads_publish_samples() {
        let mut settings = Settings::default();
        settings.timings.poll_ms = 5;
        settings.timings.liveness_ms = 50;
        let mut h = harness(settings);
        set_float(&h, fields::BRAKE, 0.5);
        h.source.start();
        let deadline = Instant::now() + Duration::from_secs(3);
        while h.samples.lock().unwrap().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        h.source.stop();
        let samples = h.samples.lock().unwrap();
        assert!(samples.len() >= 5);
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(*h.transitions.lock().unwrap(), vec![true]);
    }
}
