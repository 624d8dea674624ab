//! Headless runner: load a module, drive it for a number of ticks, export what it produced.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wasm_app_host::audio::{AudioConfig, WavSink};
use wasm_app_host::config::{DEFAULT_MODULE_PATH, DEFAULT_TICK_RATE_HZ, MIN_MEMORY_PAGES};
use wasm_app_host::fetch::DirFetcher;
use wasm_app_host::input::InputScript;
use wasm_app_host::surface::CANVAS_ID;
use wasm_app_host::ticker::{FixedTicker, Pacing};
use wasm_app_host::{Bridge, BridgeConfig, HostFunctions};

#[derive(Debug, Parser)]
#[command(about = "Run a canvas-rendering wasm module headlessly")]
struct Args {
    /// Module name, resolved against the asset directory (binary `.wasm` or `.wat` text).
    #[arg(long, default_value = DEFAULT_MODULE_PATH)]
    module: String,

    /// Directory module and resource names are resolved against.
    #[arg(long, default_value = ".")]
    assets: PathBuf,

    /// Resolve module and resource names against this HTTP origin instead of `--assets`.
    #[cfg(feature = "http")]
    #[arg(long)]
    origin: Option<String>,

    /// Size of the shared memory block in 64 KiB pages.
    #[arg(long, default_value_t = MIN_MEMORY_PAGES)]
    memory_pages: u32,

    /// Number of ticks to run.
    #[arg(long, default_value_t = 60)]
    ticks: u64,

    #[arg(long, default_value_t = DEFAULT_TICK_RATE_HZ)]
    tick_rate: f64,

    /// Run ticks back to back, each reporting exactly one period.
    #[arg(long)]
    unpaced: bool,

    /// Input script (`<tick> <event> [args]` per line).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Write the last presented frame as PNG (default `wasm_app_canvas.png`).
    #[arg(long, num_args = 0..=1)]
    frame_out: Option<Option<PathBuf>>,

    /// Write the module's audio output as WAV.
    #[arg(long)]
    audio_out: Option<PathBuf>,

    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Audio frames pulled from the module per tick.
    #[arg(long, default_value_t = 800)]
    frames_per_callback: u32,

    /// After the last tick, wait this many milliseconds for outstanding async fetches.
    #[arg(long, default_value_t = 0)]
    drain_ms: u64,
}

impl Args {
    fn config(&self) -> BridgeConfig {
        BridgeConfig {
            module_path: self.module.clone(),
            asset_root: self.assets.clone(),
            memory_pages: self.memory_pages,
            tick_rate_hz: self.tick_rate,
            audio: AudioConfig {
                sample_rate: self.sample_rate,
                channels: self.channels,
                frames_per_callback: self.frames_per_callback,
            },
        }
    }

    fn frame_path(&self) -> Option<PathBuf> {
        self.frame_out
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(|| PathBuf::from(format!("{CANVAS_ID}.png"))))
    }

    fn pacing(&self) -> Pacing {
        if self.unpaced {
            Pacing::Unpaced
        } else {
            Pacing::Realtime
        }
    }
}

#[cfg(feature = "http")]
fn host_functions(args: &Args, config: &BridgeConfig) -> HostFunctions {
    match &args.origin {
        Some(origin) => {
            tracing::info!(%origin, "resolving names over HTTP");
            HostFunctions::new(wasm_app_host::fetch::HttpFetcher::new(origin.clone()))
        }
        None => HostFunctions::new(DirFetcher::new(&config.asset_root)),
    }
}

#[cfg(not(feature = "http"))]
fn host_functions(_args: &Args, config: &BridgeConfig) -> HostFunctions {
    HostFunctions::new(DirFetcher::new(&config.asset_root))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let script = match &args.input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read input script {}", path.display()))?;
            InputScript::parse(&text)?
        }
        None => InputScript::default(),
    };

    let mut bridge = Bridge::load(&config, host_functions(&args, &config))
        .with_context(|| format!("failed to load {}", config.module_path))?;
    bridge.init()?;

    let audio = config.audio;
    let mut wav = args
        .audio_out
        .as_deref()
        .map(|path| WavSink::create(path, &audio))
        .transpose()?;

    let mut ticker = FixedTicker::new(config.tick_period(), args.pacing());
    for tick in 0..args.ticks {
        let dt = ticker.wait();

        if let Err(err) = bridge.poll_fetches() {
            tracing::warn!(%err, tick, "async fetch delivery failed");
        }
        for &event in script.events_at(tick) {
            bridge.handle_input(event)?;
        }
        bridge
            .tick(dt)
            .with_context(|| format!("tick {tick} failed"))?;

        if let Some(wav) = wav.as_mut() {
            let samples = bridge.render_audio(audio.frames_per_callback, audio.channels)?;
            wav.write(&samples)?;
        }
    }

    if args.drain_ms > 0 {
        if let Err(err) = bridge.wait_for_fetches(Duration::from_millis(args.drain_ms)) {
            tracing::warn!(%err, "async fetch delivery failed");
        }
    }

    if let Some(path) = args.frame_path() {
        let canvas = bridge.canvas().context("module never produced a frame")?;
        canvas.present().save_png(&path)?;
        tracing::info!(path = %path.display(), "frame written");
    }
    if let Some(wav) = wav {
        wav.finish()?;
    }

    tracing::info!(ticks = args.ticks, "run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_map_onto_a_valid_config() {
        let args = Args::parse_from(["wasm-app-host"]);
        let config = args.config();
        config.validate().unwrap();
        assert_eq!(config.module_path, DEFAULT_MODULE_PATH);
        assert_eq!(args.pacing(), Pacing::Realtime);
        assert_eq!(args.frame_path(), None);
    }

    #[test]
    fn bare_frame_out_uses_the_canvas_id() {
        let args = Args::parse_from(["wasm-app-host", "--frame-out", "--unpaced"]);
        assert_eq!(args.frame_path(), Some(PathBuf::from("wasm_app_canvas.png")));
        assert_eq!(args.pacing(), Pacing::Unpaced);

        let args = Args::parse_from(["wasm-app-host", "--frame-out", "shot.png"]);
        assert_eq!(args.frame_path(), Some(PathBuf::from("shot.png")));
    }
}
