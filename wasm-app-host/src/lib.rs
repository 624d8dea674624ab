//! wasm-app-host: runs a canvas-rendering WebAssembly module on a fixed-rate tick.
//!
//! The module and the host share one fixed-size linear memory. Each tick the host pushes input
//! into it, calls the module's `tick()`, then copies the RGBA8 frame the module rendered onto a
//! drawing surface. The module reaches back into the host through a handful of imports under
//! `"env"`: logging, a wall clock, synchronous and asynchronous resource fetches, and a table
//! of host-registered calls.
//!
//! Required module exports:
//! - `tick()`
//! - `getCanvasSize(out_w, out_h)`
//! - `getPixelBufferPointer() -> i32`
//! - `getStaticBufferPointer() -> i32`
//!
//! The full contract lives in `crate::abi`. [`Bridge`] is the entry point; this crate also
//! builds as a libretro core ([`AppCore`]) and ships a headless runner binary.

pub mod abi;
pub mod audio;
pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod fetch;
pub mod input;
pub mod loader;
pub mod memory;
pub mod runtime;
pub mod state;
pub mod surface;
pub mod ticker;

use std::path::{Path, PathBuf};

use libretro_backend::{
    AudioVideoInfo, Core, CoreInfo, GameData, JoypadButton, LoadGameResult, PixelFormat,
    RuntimeHandle, libretro_core,
};

pub use crate::bridge::{Bridge, Stage};
pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, BridgeResult};
pub use crate::state::HostFunctions;

use crate::audio::to_stereo;
use crate::fetch::{DirFetcher, FetchError};
use crate::input::{JoypadKey, JoypadKeys};
use crate::surface::CANVAS_ID;

/// The libretro core instance.
///
/// The loaded content is the module itself; resources it fetches are resolved next to it.
#[derive(Default)]
pub struct AppCore {
    config: BridgeConfig,
    bridge: Option<Bridge>,
    joypad: JoypadKeys,
    game_data: Option<GameData>,
}

impl AppCore {
    fn start(&mut self, game_data: &GameData) -> BridgeResult<AudioVideoInfo> {
        let (bytes, asset_root) = read_content(game_data.data(), game_data.path())?;

        let host = HostFunctions::new(DirFetcher::new(asset_root));
        let mut bridge = Bridge::instantiate(&bytes, host, self.config.memory_pages)?;
        bridge.init()?;

        let (width, height) = bridge
            .canvas()
            .map(|canvas| canvas.presented_size())
            .ok_or(BridgeError::InvalidState("drawing surface was never sized"))?;
        self.bridge = Some(bridge);

        Ok(AudioVideoInfo::new()
            .video(width, height, self.config.tick_rate_hz, PixelFormat::ARGB8888)
            .audio(self.config.audio.sample_rate as f64))
    }
}

/// Module bytes for loaded content, and the directory its resources resolve against.
///
/// In-memory data wins over the path. The asset root is the content's directory, or the working
/// directory when the frontend gave no path.
fn read_content(data: Option<&[u8]>, path: Option<&str>) -> BridgeResult<(Vec<u8>, PathBuf)> {
    let asset_root = path
        .and_then(|path| Path::new(path).parent())
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let bytes = match (data, path) {
        (Some(data), _) => data.to_vec(),
        (None, Some(path)) => std::fs::read(path).map_err(|source| FetchError::Io {
            name: path.to_string(),
            source,
        })?,
        (None, None) => return Err(BridgeError::load("content has neither data nor a path")),
    };
    Ok((bytes, asset_root))
}

fn joypad_button(key: JoypadKey) -> JoypadButton {
    match key {
        JoypadKey::Up => JoypadButton::Up,
        JoypadKey::Down => JoypadButton::Down,
        JoypadKey::Left => JoypadButton::Left,
        JoypadKey::Right => JoypadButton::Right,
        JoypadKey::A => JoypadButton::A,
        JoypadKey::B => JoypadButton::B,
        JoypadKey::X => JoypadButton::X,
        JoypadKey::Y => JoypadButton::Y,
        JoypadKey::Start => JoypadButton::Start,
        JoypadKey::Select => JoypadButton::Select,
    }
}

impl Core for AppCore {
    fn save_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn rtc_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn system_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn video_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn info() -> CoreInfo {
        CoreInfo::new(CANVAS_ID, env!("CARGO_PKG_VERSION"))
            .supports_roms_with_extension("wasm")
            .supports_roms_with_extension("wat")
    }

    fn on_load_game(&mut self, game_data: GameData) -> LoadGameResult {
        match self.start(&game_data) {
            Ok(av_info) => {
                self.game_data = Some(game_data);
                LoadGameResult::Success(av_info)
            }
            Err(err) => {
                tracing::error!(%err, "failed to load module");
                LoadGameResult::Failed(game_data)
            }
        }
    }

    fn on_unload_game(&mut self) -> GameData {
        self.bridge = None;
        self.joypad = JoypadKeys::default();
        // libretro only unloads content it loaded successfully.
        self.game_data
            .take()
            .expect("on_unload_game called without loaded content")
    }

    fn on_run(&mut self, handle: &mut RuntimeHandle) {
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };

        let events = self
            .joypad
            .poll(|key| handle.is_joypad_button_pressed(0, joypad_button(key)));
        for event in events {
            if let Err(err) = bridge.handle_input(event) {
                tracing::warn!(%err, ?event, "input event rejected");
            }
        }

        if let Err(err) = bridge.poll_fetches() {
            tracing::warn!(%err, "async fetch delivery failed");
        }

        match bridge.tick(self.config.tick_period()) {
            Ok(canvas) => handle.upload_video_frame(&canvas.present().to_xrgb8888()),
            Err(err) => tracing::error!(%err, "tick failed"),
        }

        let audio = self.config.audio;
        let frames = (audio.sample_rate as f64 / self.config.tick_rate_hz).round() as u32;
        match bridge.render_audio(frames, audio.channels) {
            Ok(samples) => handle.upload_audio_frame(&to_stereo(samples, audio.channels)),
            Err(err) => tracing::warn!(%err, "audio render failed"),
        }
    }

    fn on_reset(&mut self) {
        // The module has no re-init path; it keeps running from its current state.
        tracing::info!("reset requested; module state is kept");
    }
}

libretro_core!(AppCore);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::JOYPAD_KEYMAP;

    #[test]
    fn content_path_is_read_and_its_directory_becomes_the_asset_root() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("app.wat");
        std::fs::write(&module, "(module)").unwrap();

        let (bytes, root) = read_content(None, module.to_str()).unwrap();
        assert_eq!(bytes, b"(module)");
        assert_eq!(root, dir.path());
    }

    #[test]
    fn in_memory_content_wins_over_the_path() {
        let (bytes, root) =
            read_content(Some(&b"\0asm"[..]), Some("games/missing.wasm")).unwrap();
        assert_eq!(bytes, b"\0asm");
        assert_eq!(root, Path::new("games"));
    }

    #[test]
    fn content_without_a_directory_resolves_against_the_working_directory() {
        let (_, root) = read_content(Some(&b"\0asm"[..]), None).unwrap();
        assert_eq!(root, Path::new("."));
        let (_, root) = read_content(Some(&b"\0asm"[..]), Some("app.wasm")).unwrap();
        assert_eq!(root, Path::new("."));
    }

    #[test]
    fn unreadable_content_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.wasm");
        assert!(matches!(
            read_content(None, missing.to_str()),
            Err(BridgeError::ResourceFetch(FetchError::Io { .. }))
        ));
        assert!(matches!(
            read_content(None, None),
            Err(BridgeError::ModuleLoad(_))
        ));
    }

    #[test]
    fn every_mapped_joypad_key_has_a_distinct_button() {
        let mut seen = Vec::new();
        for (key, _) in JOYPAD_KEYMAP {
            let button = joypad_button(key) as u32;
            assert!(!seen.contains(&button), "{key:?} maps onto a button twice");
            seen.push(button);
        }
    }
}
