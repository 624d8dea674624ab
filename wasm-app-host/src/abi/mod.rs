//! ABI contract between the host (this crate) and the guest module.
//!
//! ## Imports (guest -> host)
//! Imported from module `"env"`:
//! - `memory`: the shared block, fixed size (`initial == maximum`)
//! - `log(ptr: i32, len: i32)`
//! - `nowMillis() -> i64`: wall clock, not monotonic
//! - `readFileSync(name_ptr, name_len, out_ptr, out_len) -> i32`: status code, see [`FetchStatus`]
//! - `readFileAsync(name_ptr, name_len)`
//! - `dispatchInlinedCall(index: i32)`
//!
//! ## Exports (host -> guest)
//! Required: `tick`, `getCanvasSize`, `getPixelBufferPointer`, `getStaticBufferPointer`.
//!
//! Optional: `init`, `setDeltaTime`, `setMouse`, `getCanvasScaling`, `requestBuffer`,
//! `sendEvent`, `fillAudio`.
//!
//! ## Static buffer
//! A 256-byte window owned by the guest and located by `getStaticBufferPointer()`. The host
//! writes canvas-size out parameters, event names and the key table there. Nothing written to
//! it outlives the call that consumes it.

use wasmtime::{AsContextMut, Func, Instance, TypedFunc};

use crate::error::{BridgeError, BridgeResult};

/// Import module name used by the guest.
pub const IMPORT_MODULE: &str = "env";

/// Size of a wasm page.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Size of the interface/static buffer.
pub const STATIC_BUFFER_LEN: u32 = 256;

/// Number of key slots pushed to the guest each tick.
pub const KEY_COUNT: usize = 256;

/// Key code of slot 0. Codes below, or at/after `KEY_CODE_OFFSET + KEY_COUNT`, are dropped.
pub const KEY_CODE_OFFSET: u32 = 32;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: u64 = 4;

/// Host import names provided to the guest.
pub mod host_imports {
    pub const MEMORY: &str = "memory";
    pub const LOG: &str = "log";
    pub const NOW_MILLIS: &str = "nowMillis";
    pub const READ_FILE_SYNC: &str = "readFileSync";
    pub const READ_FILE_ASYNC: &str = "readFileAsync";
    pub const DISPATCH_INLINED_CALL: &str = "dispatchInlinedCall";
}

/// Guest export names.
pub mod guest_exports {
    pub const MEMORY: &str = "memory";
    pub const INIT: &str = "init";
    pub const TICK: &str = "tick";
    pub const SET_DELTA_TIME: &str = "setDeltaTime";
    pub const SET_MOUSE: &str = "setMouse";
    pub const GET_CANVAS_SIZE: &str = "getCanvasSize";
    pub const GET_CANVAS_SCALING: &str = "getCanvasScaling";
    pub const GET_PIXEL_BUFFER_POINTER: &str = "getPixelBufferPointer";
    pub const GET_STATIC_BUFFER_POINTER: &str = "getStaticBufferPointer";
    pub const REQUEST_BUFFER: &str = "requestBuffer";
    pub const SEND_EVENT: &str = "sendEvent";
    pub const FILL_AUDIO: &str = "fillAudio";
}

/// Event names written into the static buffer before `sendEvent`.
pub mod events {
    use super::STATIC_BUFFER_LEN;

    pub const MOUSE_DOWN: &str = "mouse:down";
    pub const MOUSE_UP: &str = "mouse:up";

    const BUFFER_FAILED_PREFIX: &str = "error:buffer:";

    /// Longest async resource name whose completion events both fit the static buffer.
    pub const MAX_RESOURCE_NAME_LEN: usize =
        STATIC_BUFFER_LEN as usize - BUFFER_FAILED_PREFIX.len();

    /// `buffer:<name>`, delivered when an async fetch completes.
    pub fn buffer_ready(name: &str) -> String {
        format!("buffer:{name}")
    }

    /// `error:buffer:<name>`, delivered when an async fetch fails.
    pub fn buffer_failed(name: &str) -> String {
        format!("{BUFFER_FAILED_PREFIX}{name}")
    }
}

/// Status codes returned by `readFileSync`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FetchStatus {
    Ok = 0,
    FetchFailed = 1,
    AllocationFailed = 2,
    /// Name or out cells out of bounds, or name not UTF-8.
    BadArguments = 3,
}

/// Typed view of the guest's exports, resolved once after instantiation.
#[derive(Clone)]
pub struct GuestExports {
    pub init: Option<TypedFunc<(), ()>>,
    pub tick: TypedFunc<(), ()>,
    pub set_delta_time: Option<TypedFunc<f64, ()>>,
    pub set_mouse: Option<TypedFunc<(i32, i32, i32), ()>>,
    pub get_canvas_size: TypedFunc<(u32, u32), ()>,
    pub get_canvas_scaling: Option<TypedFunc<(), f32>>,
    pub get_pixel_buffer_pointer: TypedFunc<(), u32>,
    pub get_static_buffer_pointer: TypedFunc<(), u32>,
    pub request_buffer: Option<TypedFunc<u32, u32>>,
    pub send_event: Option<TypedFunc<(u32, u32, u32), ()>>,
    pub fill_audio: Option<TypedFunc<(u32, u32), u32>>,
}

impl GuestExports {
    /// Resolve exports from an instance. Required exports that are absent, or present with the
    /// wrong signature, are reported as [`BridgeError::MissingExport`].
    pub fn resolve(instance: &Instance, mut store: impl AsContextMut) -> BridgeResult<Self> {
        let mut store = store.as_context_mut();
        let mut required = |name: &'static str| {
            instance
                .get_func(&mut store, name)
                .ok_or(BridgeError::MissingExport(name))
        };

        let tick = required(guest_exports::TICK)?;
        let get_canvas_size = required(guest_exports::GET_CANVAS_SIZE)?;
        let get_pixel_buffer_pointer = required(guest_exports::GET_PIXEL_BUFFER_POINTER)?;
        let get_static_buffer_pointer = required(guest_exports::GET_STATIC_BUFFER_POINTER)?;

        Ok(Self {
            tick: typed(&store, tick, guest_exports::TICK)?,
            get_canvas_size: typed(&store, get_canvas_size, guest_exports::GET_CANVAS_SIZE)?,
            get_pixel_buffer_pointer: typed(
                &store,
                get_pixel_buffer_pointer,
                guest_exports::GET_PIXEL_BUFFER_POINTER,
            )?,
            get_static_buffer_pointer: typed(
                &store,
                get_static_buffer_pointer,
                guest_exports::GET_STATIC_BUFFER_POINTER,
            )?,
            init: optional(instance, &mut store, guest_exports::INIT)?,
            set_delta_time: optional(instance, &mut store, guest_exports::SET_DELTA_TIME)?,
            set_mouse: optional(instance, &mut store, guest_exports::SET_MOUSE)?,
            get_canvas_scaling: optional(instance, &mut store, guest_exports::GET_CANVAS_SCALING)?,
            request_buffer: optional(instance, &mut store, guest_exports::REQUEST_BUFFER)?,
            send_event: optional(instance, &mut store, guest_exports::SEND_EVENT)?,
            fill_audio: optional(instance, &mut store, guest_exports::FILL_AUDIO)?,
        })
    }
}

fn typed<P, R>(
    store: impl wasmtime::AsContext,
    func: Func,
    name: &'static str,
) -> BridgeResult<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    func.typed::<P, R>(&store).map_err(|err| {
        tracing::error!(export = name, error = %err, "export has an unexpected signature");
        BridgeError::MissingExport(name)
    })
}

/// Optional exports may be absent, but a present export with the wrong signature is an error.
fn optional<P, R>(
    instance: &Instance,
    mut store: impl AsContextMut,
    name: &'static str,
) -> BridgeResult<Option<TypedFunc<P, R>>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_func(&mut store, name) {
        Some(func) => typed(&store, func, name).map(Some),
        None => Ok(None),
    }
}
