//! Host import definitions.
//!
//! This module defines all the host functions imported by guest modules under the "env" module.
//! Imports never panic: `readFileSync` reports failures through its status code, `log` and
//! `nowMillis` cannot fail, and the rest trap with a descriptive error.

use std::time::{SystemTime, UNIX_EPOCH};

use wasmtime::{Caller, Extern, Linker};

use crate::abi::{FetchStatus, IMPORT_MODULE, events, guest_exports, host_imports};
use crate::error::{BridgeError, BridgeResult};
use crate::memory::{SharedMemory, check_region};
use crate::state::HostState;

/// Define all host imports expected by guests under module `"env"`.
///
/// Must be called before instantiating the module.
pub fn define_imports(linker: &mut Linker<HostState>) -> Result<(), anyhow::Error> {
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::LOG,
        |caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let Some(memory) = caller.data().memory else {
                tracing::warn!(target: "guest", "log called before memory was attached");
                return;
            };
            match memory.slice(&caller, ptr, len as u64) {
                Ok(bytes) => tracing::info!(target: "guest", "{}", String::from_utf8_lossy(bytes)),
                Err(err) => tracing::warn!(target: "guest", %err, "log message out of bounds"),
            }
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::NOW_MILLIS,
        |_caller: Caller<'_, HostState>| -> i64 { now_millis() },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::READ_FILE_SYNC,
        |mut caller: Caller<'_, HostState>,
         name_ptr: u32,
         name_len: u32,
         out_ptr: u32,
         out_len: u32|
         -> i32 { read_file_sync(&mut caller, name_ptr, name_len, out_ptr, out_len) as i32 },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::READ_FILE_ASYNC,
        |mut caller: Caller<'_, HostState>, name_ptr: u32, name_len: u32| -> wasmtime::Result<()> {
            let name = read_name(&caller, name_ptr, name_len)
                .map_err(|e| wasmtime::Error::msg(format!("readFileAsync: {e}")))?;
            if name.len() > events::MAX_RESOURCE_NAME_LEN {
                return Err(wasmtime::Error::msg(format!(
                    "readFileAsync: name is {} bytes, at most {} fit a completion event",
                    name.len(),
                    events::MAX_RESOURCE_NAME_LEN
                )));
            }
            caller.data_mut().fetch_async(name);
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::DISPATCH_INLINED_CALL,
        |mut caller: Caller<'_, HostState>, index: i32| -> wasmtime::Result<()> {
            if caller.data_mut().callbacks.dispatch(index) {
                Ok(())
            } else {
                Err(wasmtime::Error::msg(format!(
                    "dispatchInlinedCall: no host call registered at index {index}"
                )))
            }
        },
    )?;

    Ok(())
}

/// Wall-clock milliseconds since the Unix epoch. Not monotonic.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn attached_memory(caller: &Caller<'_, HostState>) -> BridgeResult<SharedMemory> {
    caller
        .data()
        .memory
        .ok_or(BridgeError::InvalidState("no shared memory attached"))
}

fn read_name(caller: &Caller<'_, HostState>, ptr: u32, len: u32) -> BridgeResult<String> {
    let memory = attached_memory(caller)?;
    let bytes = memory.read(caller, ptr, len as u64)?;
    String::from_utf8(bytes).map_err(|_| BridgeError::InvalidState("resource name is not UTF-8"))
}

fn read_file_sync(
    caller: &mut Caller<'_, HostState>,
    name_ptr: u32,
    name_len: u32,
    out_ptr: u32,
    out_len: u32,
) -> FetchStatus {
    let memory = match attached_memory(caller) {
        Ok(memory) => memory,
        Err(err) => {
            tracing::warn!(%err, "readFileSync");
            return FetchStatus::AllocationFailed;
        }
    };

    let capacity = memory.capacity(&*caller);
    let cells_ok = check_region(out_ptr as u64, 4, capacity)
        .and_then(|_| check_region(out_len as u64, 4, capacity));
    let name = match cells_ok.and_then(|_| read_name(caller, name_ptr, name_len)) {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(%err, "readFileSync: bad arguments");
            return FetchStatus::BadArguments;
        }
    };

    let bytes = match caller.data().fetcher.fetch(&name) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(%name, %err, "readFileSync: fetch failed");
            return FetchStatus::FetchFailed;
        }
    };

    let placed = request_buffer(caller).and_then(|alloc| memory.place(&mut *caller, &alloc, &bytes));
    let offset = match placed {
        Ok(offset) => offset,
        Err(err) => {
            tracing::warn!(%name, %err, "readFileSync: could not place bytes in guest memory");
            return FetchStatus::AllocationFailed;
        }
    };

    // Both cells were bounds-checked above and the memory cannot shrink.
    let written = memory
        .write_u32(&mut *caller, out_ptr, offset)
        .and_then(|_| memory.write_u32(&mut *caller, out_len, bytes.len() as u32));
    if let Err(err) = written {
        tracing::warn!(%name, %err, "readFileSync: could not write out cells");
        return FetchStatus::AllocationFailed;
    }

    tracing::debug!(%name, offset, len = bytes.len(), "readFileSync delivered");
    FetchStatus::Ok
}

fn request_buffer(caller: &mut Caller<'_, HostState>) -> BridgeResult<wasmtime::TypedFunc<u32, u32>> {
    caller
        .get_export(guest_exports::REQUEST_BUFFER)
        .and_then(Extern::into_func)
        .ok_or(BridgeError::MissingExport(guest_exports::REQUEST_BUFFER))?
        .typed::<u32, u32>(&*caller)
        .map_err(|_| BridgeError::MissingExport(guest_exports::REQUEST_BUFFER))
}
