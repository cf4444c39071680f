use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use tracing::{info, warn};

use crate::cli::{SourceArgs, SourceKind};
use crate::pipeline::SignalPipeline;
use crate::provider::{Connector, MockProvider, TelemetryProvider, UdpProvider};
use crate::refresh::RefreshClock;
use crate::sampler::{Sample, SampleSource};
use crate::settings::{Settings, SharedSettings};
use crate::trace::TraceBuffer;
use crate::ui::overlay::TerminalOverlay;

pub fn connector_for(args: &SourceArgs) -> Connector {
    match args.source {
        SourceKind::Mock => Box::new(|| Ok(Box::new(MockProvider::new()) as Box<dyn TelemetryProvider>)),
        SourceKind::Udp => {
            let bind = args.bind;
            Box::new(move || Ok(Box::new(UdpProvider::new(bind)) as Box<dyn TelemetryProvider>))
        }
    }
}

fn shared_settings(args: &SourceArgs) -> Arc<SharedSettings> {
    let settings = match &args.settings {
        Some(path) => Settings::load_or_default(path),
        None => Settings::default(),
    };
    Arc::new(SharedSettings::new(settings, args.settings.clone()))
}

fn stop_on_ctrlc() -> Arc<AtomicBool> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }
    stop_flag
}

pub fn run_overlay(args: SourceArgs) -> Result<()> {
    let stop = stop_on_ctrlc();
    let settings = shared_settings(&args);
    info!(source = ?args.source, bind = %args.bind, "Starting inputscope");

    let pipeline = SignalPipeline::new(settings.bar_smoothing_percent());
    let publisher = pipeline.publisher();
    // connection changes arrive on worker threads; the refresh loop drains them
    let (conn_tx, conn_rx) = channel::unbounded::<bool>();

    let mut source = SampleSource::new(
        connector_for(&args),
        Arc::clone(&settings),
        Box::new(move |sample: Sample| publisher.publish(&sample)),
        Box::new(move |connected: bool| {
            let _ = conn_tx.send(connected);
        }),
    );
    let mut clock = RefreshClock::new(pipeline, Arc::new(TraceBuffer::new()), settings, conn_rx);

    source.start();
    let result = TerminalOverlay::new().and_then(|mut overlay| {
        let run = clock.run(&mut overlay, &stop);
        overlay.close().context("Restoring terminal")?;
        run
    });

    info!("Shutting down");
    source.stop();
    result
}

pub fn run_probe(args: SourceArgs, count: Option<usize>) -> Result<()> {
    let stop = stop_on_ctrlc();
    let out = std::io::stdout();
    probe(&args, count, &stop, &mut out.lock())
}

/// Dump samples as JSON lines until `count` were written or `stop` is set.
pub(crate) fn probe(args: &SourceArgs, count: Option<usize>, stop: &AtomicBool, out: &mut dyn Write) -> Result<()> {
    let (sample_tx, sample_rx) = channel::bounded::<Sample>(256);
    let mut source = SampleSource::new(
        connector_for(args),
        shared_settings(args),
        Box::new(move |sample: Sample| {
            // a slow consumer loses samples rather than stalling the poll
            let _ = sample_tx.try_send(sample);
        }),
        Box::new(|connected: bool| info!(connected, "Telemetry connection changed")),
    );
    source.start();

    let mut written = 0usize;
    let result = loop {
        if stop.load(Ordering::Relaxed) || count.is_some_and(|c| written >= c) {
            break Ok(());
        }
        match sample_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(sample) => {
                let line = serde_json::to_string(&sample).context("Encoding sample")?;
                if let Err(e) = writeln!(out, "{line}") {
                    break Err(anyhow::Error::from(e).context("Writing sample"));
                }
                written += 1;
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };
    info!(written, connected = source.is_connected(), "Probe finished");
    source.stop();
    result
}

pub fn show_settings(path: &Path, reset: bool) -> Result<()> {
    let settings = if reset {
        let defaults = Settings::default();
        defaults.save(path)?;
        info!(path = %path.display(), "Settings reset to defaults");
        defaults
    } else if path.exists() {
        Settings::load(path)?
    } else {
        warn!(path = %path.display(), "Settings file not found, showing defaults");
        Settings::default()
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
