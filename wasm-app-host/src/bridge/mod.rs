//! The module host bridge.
//!
//! A [`Bridge`] owns one instantiated module and everything it is connected to: the shared
//! block, the host imports, the drawing surface and the input snapshot. Frontends (the
//! libretro core, the headless runner) drive it with [`Bridge::init`] once, then
//! [`Bridge::tick`] on a fixed timer, feeding input through [`Bridge::handle_input`] and
//! delivering asynchronous fetches between ticks with [`Bridge::poll_fetches`].

use std::time::{Duration, Instant};

use wasmtime::Store;

use crate::abi::{GuestExports, STATIC_BUFFER_LEN, events, guest_exports};
use crate::audio::samples_from_le_bytes;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::fetch::FetchCompletion;
use crate::input::{InputEvent, InputSnapshot};
use crate::loader;
use crate::memory::{SharedMemory, check_region};
use crate::runtime::{WasmtimeRuntime, engine};
use crate::state::{HostFunctions, HostState};
use crate::surface::{Canvas, CanvasInfo};


/// Lifecycle stage. There is no terminal stage: once initialized the bridge ticks until it is
/// dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Instantiated,
    Initialized,
}

pub struct Bridge {
    store: Store<HostState>,
    exports: GuestExports,
    memory: SharedMemory,
    static_buffer: u32,
    stage: Stage,
    input: InputSnapshot,
    canvas: Option<Canvas>,
}

impl Bridge {
    /// Compile `bytes` (binary wasm or WAT text), link it against a fresh shared block of
    /// `memory_pages` pages plus the host imports, and resolve its exports.
    pub fn instantiate(bytes: &[u8], host: HostFunctions, memory_pages: u32) -> BridgeResult<Self> {
        let engine = engine()?;
        let module = loader::compile_module(&engine, bytes)?;

        let mut runtime = WasmtimeRuntime::new(engine, HostState::new(host));
        runtime.define_shared_memory(memory_pages)?;
        runtime.define_imports()?;
        let (_instance, exports) = runtime.instantiate(&module)?;

        let WasmtimeRuntime { mut store, .. } = runtime;
        let memory = store
            .data()
            .memory
            .ok_or(BridgeError::InvalidState("module has no shared memory"))?;

        let static_buffer = exports
            .get_static_buffer_pointer
            .call(&mut store, ())
            .map_err(|e| BridgeError::guest(guest_exports::GET_STATIC_BUFFER_POINTER, e))?;
        check_region(
            static_buffer as u64,
            STATIC_BUFFER_LEN as u64,
            memory.capacity(&store),
        )?;

        tracing::info!(
            memory_bytes = memory.capacity(&store),
            static_buffer,
            "module instantiated"
        );

        Ok(Self {
            store,
            exports,
            memory,
            static_buffer,
            stage: Stage::Instantiated,
            input: InputSnapshot::default(),
            canvas: None,
        })
    }

    /// Resolve `config.module_path` through the host's resource fetcher and instantiate it.
    pub fn load(config: &BridgeConfig, host: HostFunctions) -> BridgeResult<Self> {
        config.validate()?;
        let bytes = host.fetcher.fetch(&config.module_path)?;
        tracing::debug!(path = %config.module_path, len = bytes.len(), "module fetched");
        Self::instantiate(&bytes, host, config.memory_pages)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn input(&self) -> &InputSnapshot {
        &self.input
    }

    /// The drawing surface. `None` until [`Bridge::init`] has succeeded.
    pub fn canvas(&self) -> Option<&Canvas> {
        self.canvas.as_ref()
    }

    pub fn memory_capacity(&self) -> u64 {
        self.memory.capacity(&self.store)
    }

    pub fn static_buffer(&self) -> u32 {
        self.static_buffer
    }

    /// Copy `len` bytes out of the shared block.
    pub fn read_memory(&self, offset: u32, len: u64) -> BridgeResult<Vec<u8>> {
        self.memory.read(&self.store, offset, len)
    }

    /// Run the module's `init` (if exported) exactly once, then size the drawing surface.
    pub fn init(&mut self) -> BridgeResult<()> {
        if self.stage != Stage::Instantiated {
            return Err(BridgeError::InvalidState("init called more than once"));
        }
        if let Some(init) = &self.exports.init {
            init.call(&mut self.store, ())
                .map_err(|e| BridgeError::guest(guest_exports::INIT, e))?;
        }
        self.stage = Stage::Initialized;

        let info = self.canvas_info()?;
        let capacity = self.memory_capacity();
        if info.frame_len() > capacity {
            return Err(BridgeError::OutOfBounds {
                offset: 0,
                len: info.frame_len(),
                capacity,
            });
        }
        self.canvas = Some(Canvas::new(info)?);

        tracing::info!(
            width = info.width,
            height = info.height,
            scaling = ?info.scaling,
            "module initialized"
        );
        Ok(())
    }

    /// Ask the module for its canvas size through the static buffer.
    pub fn canvas_size(&mut self) -> BridgeResult<(u32, u32)> {
        let (out_w, out_h) = (self.static_buffer, self.static_buffer + 4);
        self.exports
            .get_canvas_size
            .call(&mut self.store, (out_w, out_h))
            .map_err(|e| BridgeError::guest(guest_exports::GET_CANVAS_SIZE, e))?;

        let width = self.memory.read_u32(&self.store, out_w)?;
        let height = self.memory.read_u32(&self.store, out_h)?;
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidCanvas { width, height });
        }
        Ok((width, height))
    }

    /// The module's scaling factor, or `None` when it does not export `getCanvasScaling`.
    pub fn canvas_scaling(&mut self) -> BridgeResult<Option<f32>> {
        match &self.exports.get_canvas_scaling {
            Some(scaling) => scaling
                .call(&mut self.store, ())
                .map(Some)
                .map_err(|e| BridgeError::guest(guest_exports::GET_CANVAS_SCALING, e)),
            None => Ok(None),
        }
    }

    pub fn canvas_info(&mut self) -> BridgeResult<CanvasInfo> {
        let (width, height) = self.canvas_size()?;
        let scaling = self.canvas_scaling()?;
        Ok(CanvasInfo {
            width,
            height,
            scaling,
        })
    }

    /// Apply an input event to the snapshot. Mouse buttons are also forwarded to the module as
    /// `mouse:down` / `mouse:up` events once it is initialized.
    pub fn handle_input(&mut self, event: InputEvent) -> BridgeResult<()> {
        self.input.apply(event);

        let name = match event {
            InputEvent::MouseDown => events::MOUSE_DOWN,
            InputEvent::MouseUp => events::MOUSE_UP,
            _ => return Ok(()),
        };
        if self.stage == Stage::Initialized && self.exports.send_event.is_some() {
            self.send_event(name, 0, 0)?;
        }
        Ok(())
    }

    /// Write `name` into the static buffer and call `sendEvent(name_len, data_offset, data_len)`.
    pub fn send_event(&mut self, name: &str, data_offset: u32, data_len: u32) -> BridgeResult<()> {
        let Some(send_event) = &self.exports.send_event else {
            return Err(BridgeError::MissingExport(guest_exports::SEND_EVENT));
        };
        let bytes = name.as_bytes();
        if bytes.len() > STATIC_BUFFER_LEN as usize {
            return Err(BridgeError::OutOfBounds {
                offset: self.static_buffer as u64,
                len: bytes.len() as u64,
                capacity: STATIC_BUFFER_LEN as u64,
            });
        }

        self.memory.write(&mut self.store, self.static_buffer, bytes)?;
        tracing::trace!(name, data_offset, data_len, "sendEvent");
        send_event
            .call(&mut self.store, (bytes.len() as u32, data_offset, data_len))
            .map_err(|e| BridgeError::guest(guest_exports::SEND_EVENT, e))
    }

    /// One tick cycle: `setDeltaTime`, `setMouse`, key table push, `tick`, then blit the
    /// module's frame onto the drawing surface.
    pub fn tick(&mut self, dt: Duration) -> BridgeResult<&Canvas> {
        if self.stage != Stage::Initialized {
            return Err(BridgeError::InvalidState("tick called before init"));
        }

        if let Some(set_delta_time) = &self.exports.set_delta_time {
            set_delta_time
                .call(&mut self.store, dt.as_secs_f64() * 1000.0)
                .map_err(|e| BridgeError::guest(guest_exports::SET_DELTA_TIME, e))?;
        }

        if let (Some(set_mouse), Some((x, y))) = (&self.exports.set_mouse, self.input.mouse) {
            set_mouse
                .call(&mut self.store, (x, y, i32::from(self.input.mouse_down)))
                .map_err(|e| BridgeError::guest(guest_exports::SET_MOUSE, e))?;
        }

        let keys = self.input.key_table();
        self.memory.write(&mut self.store, self.static_buffer, &keys)?;

        self.exports
            .tick
            .call(&mut self.store, ())
            .map_err(|e| BridgeError::guest(guest_exports::TICK, e))?;

        self.blit()
    }

    /// Copy the module's current frame into the drawing surface. The pixel offset is only valid
    /// for the tick that produced it, so it is queried every time.
    fn blit(&mut self) -> BridgeResult<&Canvas> {
        let canvas = self
            .canvas
            .as_mut()
            .ok_or(BridgeError::InvalidState("drawing surface was never sized"))?;

        let offset = self
            .exports
            .get_pixel_buffer_pointer
            .call(&mut self.store, ())
            .map_err(|e| BridgeError::guest(guest_exports::GET_PIXEL_BUFFER_POINTER, e))?;
        let frame = self
            .memory
            .slice(&self.store, offset, canvas.info().frame_len())?;
        canvas.put_image_data(frame)?;
        Ok(&*canvas)
    }

    pub fn pending_fetches(&self) -> usize {
        self.store.data().fetches.pending()
    }

    /// Deliver every asynchronous fetch that has completed so far. Returns how many were
    /// delivered, or the first delivery failure once all of them have been attempted.
    pub fn poll_fetches(&mut self) -> BridgeResult<usize> {
        let ready = self.store.data_mut().fetches.drain_ready();
        let mut failure = None;
        let delivered = ready.len();
        for completion in ready {
            self.deliver_logged(completion, &mut failure);
        }
        failure.map_or(Ok(delivered), Err)
    }

    /// Block until every pending fetch has been delivered or `timeout` elapses.
    pub fn wait_for_fetches(&mut self, timeout: Duration) -> BridgeResult<usize> {
        let deadline = Instant::now() + timeout;
        let mut failure = None;
        let mut delivered = 0;
        while let Some(completion) = self.store.data_mut().fetches.next_before(deadline) {
            self.deliver_logged(completion, &mut failure);
            delivered += 1;
        }
        if self.pending_fetches() > 0 {
            tracing::warn!(
                pending = self.pending_fetches(),
                ?timeout,
                "fetches still pending after timeout"
            );
        }
        failure.map_or(Ok(delivered), Err)
    }

    fn deliver_logged(&mut self, completion: FetchCompletion, failure: &mut Option<BridgeError>) {
        let name = completion.name.clone();
        if let Err(err) = self.deliver(completion) {
            tracing::warn!(%name, %err, "async fetch delivery failed");
            failure.get_or_insert(err);
        }
    }

    fn deliver(&mut self, completion: FetchCompletion) -> BridgeResult<()> {
        let FetchCompletion { name, result } = completion;
        if name.len() > events::MAX_RESOURCE_NAME_LEN {
            return Err(BridgeError::OutOfBounds {
                offset: self.static_buffer as u64,
                len: events::buffer_failed(&name).len() as u64,
                capacity: STATIC_BUFFER_LEN as u64,
            });
        }
        match result {
            Ok(bytes) => {
                let Some(request_buffer) = &self.exports.request_buffer else {
                    return Err(BridgeError::MissingExport(guest_exports::REQUEST_BUFFER));
                };
                let offset = self.memory.place(&mut self.store, request_buffer, &bytes)?;
                tracing::debug!(%name, offset, len = bytes.len(), "async fetch delivered");
                self.send_event(&events::buffer_ready(&name), offset, bytes.len() as u32)
            }
            Err(err) => {
                if self.exports.send_event.is_some() {
                    self.send_event(&events::buffer_failed(&name), 0, 0)?;
                }
                Err(err.into())
            }
        }
    }

    /// Pull `frames` frames of interleaved i16 samples from the module's `fillAudio` export.
    /// Silence when the export is absent or the module is not initialized yet.
    pub fn render_audio(&mut self, frames: u32, channels: u16) -> BridgeResult<Vec<i16>> {
        let samples = frames as u64 * channels as u64;
        let fill_audio = match &self.exports.fill_audio {
            Some(fill_audio) if self.stage == Stage::Initialized => fill_audio,
            _ => return Ok(vec![0; samples as usize]),
        };

        let offset = fill_audio
            .call(&mut self.store, (frames, channels as u32))
            .map_err(|e| BridgeError::guest(guest_exports::FILL_AUDIO, e))?;
        let bytes = self.memory.slice(&self.store, offset, samples * 2)?;
        Ok(samples_from_le_bytes(bytes))
    }
}
