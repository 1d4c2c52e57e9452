// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// FFI cdylib: all public functions are unsafe extern "C" called from the JVM.
#![allow(clippy::missing_safety_doc)]

//! C ABI over pybridge sessions.
//!
//! Functions are prefixed with `pyb_`. Handles are opaque pointers returned
//! by `pyb_session_create` and released with `pyb_session_destroy`. Failure
//! is reported as `-1` / null; the message is available from
//! `pyb_last_error` on the same thread until the next failing call.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char};
use std::sync::{Arc, Once};

use pybridge::{
    BridgeClient, BridgeConfig, BridgeSession, HandoffBuffer, SessionRegistry, new_correlation_id,
};

// ============================================================================
// Context
// ============================================================================

/// Opaque per-host handle onto the process-wide session for a work dir.
pub struct PyBridgeHandle {
    session: Arc<BridgeSession>,
    client: BridgeClient,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

static LOGGING: Once = Once::new();

fn init_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("PYBRIDGE_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    tracing::error!("[pyb] {}", message);
    let c_message = CString::new(message.replace('\0', " ")).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = c_message);
}

unsafe fn c_str_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn into_c_string(text: String) -> *mut c_char {
    match CString::new(text.replace('\0', " ")) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

unsafe fn handle_ref<'a>(handle: *const PyBridgeHandle) -> Option<&'a PyBridgeHandle> {
    if handle.is_null() {
        set_last_error("null session handle");
        return None;
    }
    Some(unsafe { &*handle })
}

fn resolve_config(config_toml: Option<&str>) -> pybridge::Result<BridgeConfig> {
    let mut config = match config_toml {
        Some(text) => BridgeConfig::from_toml_str(text)
            .map_err(|e| pybridge::BridgeError::Configuration(e.to_string()))?,
        None => BridgeConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// C ABI: Session lifecycle
// ============================================================================

/// Create a handle for the session described by `config_toml` (TOML text;
/// null for defaults plus `PYBRIDGE_*` overrides).
///
/// Returns null on error. Caller must call `pyb_session_destroy` when done.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_session_create(config_toml: *const c_char) -> *mut PyBridgeHandle {
    init_logging();
    let text = if config_toml.is_null() {
        None
    } else {
        match unsafe { c_str_to_str(config_toml) } {
            Some(text) => Some(text),
            None => {
                set_last_error("config is not valid UTF-8");
                return std::ptr::null_mut();
            }
        }
    };

    match resolve_config(text) {
        Ok(config) => {
            let session = SessionRegistry::global().get_or_create(config);
            let client = BridgeClient::new(Arc::clone(&session));
            Box::into_raw(Box::new(PyBridgeHandle { session, client }))
        }
        Err(e) => {
            set_last_error(format!("Failed to create session: {}", e));
            std::ptr::null_mut()
        }
    }
}

/// Initialize the session. Idempotent; `session_key` may be null.
///
/// Returns 0 on success, -1 on error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_session_initialize(
    handle: *const PyBridgeHandle,
    session_key: *const c_char,
) -> i32 {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return -1;
    };
    let key = unsafe { c_str_to_str(session_key) };
    match handle.session.initialize(key) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(format!("Failed to initialize session: {}", e));
            -1
        }
    }
}

/// 0 uninitialized, 1 initializing, 2 ready, 3 failed, -1 null handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_session_state(handle: *const PyBridgeHandle) -> i32 {
    match unsafe { handle_ref(handle) } {
        Some(handle) => handle.session.state().code(),
        None => -1,
    }
}

/// Stop the worker. The session can be initialized again afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_session_shutdown(handle: *const PyBridgeHandle) {
    if let Some(handle) = unsafe { handle_ref(handle) } {
        handle.session.shutdown();
    }
}

/// Release a handle. The underlying session stays registered for the
/// process; call `pyb_session_shutdown` first to stop its worker.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_session_destroy(handle: *mut PyBridgeHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

// ============================================================================
// C ABI: Dispatch
// ============================================================================

/// Execute one task. `request_id` may be null (a fresh id is generated).
///
/// Returns an owned buffer of `*out_len` bytes, or null if processing
/// failed. Free with `pyb_buffer_free(ptr, *out_len)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_execute(
    handle: *const PyBridgeHandle,
    task_type: *const c_char,
    request_id: *const c_char,
    metadata: *const c_char,
    data: *const u8,
    len: usize,
    out_len: *mut usize,
) -> *mut u8 {
    if !out_len.is_null() {
        unsafe { *out_len = 0 };
    }
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return std::ptr::null_mut();
    };
    let Some(task_type) = (unsafe { c_str_to_str(task_type) }) else {
        set_last_error("task_type is null or not UTF-8");
        return std::ptr::null_mut();
    };
    let metadata = unsafe { c_str_to_str(metadata) }.unwrap_or("NONE");
    let request_id = match unsafe { c_str_to_str(request_id) } {
        Some(id) => id.to_string(),
        None => new_correlation_id(),
    };
    let input: &[u8] = if data.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };

    match pybridge::dispatch::dispatch_with(&handle.session, task_type, &request_id, metadata, input) {
        Some(output) => {
            let output = output.into_boxed_slice();
            if !out_len.is_null() {
                unsafe { *out_len = output.len() };
            }
            Box::into_raw(output) as *mut u8
        }
        None => {
            set_last_error(format!("{} failed (request {})", task_type, request_id));
            std::ptr::null_mut()
        }
    }
}

/// Free a buffer returned by `pyb_execute`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_buffer_free(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Metadata-only task. Returns an owned string (an `"ERROR: ..."` sentinel
/// on failure). Free with `pyb_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_send_task(
    handle: *const PyBridgeHandle,
    task_type: *const c_char,
    metadata: *const c_char,
) -> *mut c_char {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return std::ptr::null_mut();
    };
    let Some(task_type) = (unsafe { c_str_to_str(task_type) }) else {
        set_last_error("task_type is null or not UTF-8");
        return std::ptr::null_mut();
    };
    let metadata = unsafe { c_str_to_str(metadata) }.unwrap_or("NONE");
    into_c_string(handle.client.send_task(task_type, metadata))
}

/// Worker status as a JSON object string. Free with `pyb_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_status(handle: *const PyBridgeHandle) -> *mut c_char {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return std::ptr::null_mut();
    };
    into_c_string(handle.client.status().to_json().to_string())
}

/// Legacy file transport over `data[..len]`, which is overwritten in place
/// with the worker's output. Returns the worker's combined output or an
/// `"Error..."` sentinel. Free with `pyb_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_run_raw(
    handle: *const PyBridgeHandle,
    data: *mut u8,
    len: usize,
    width: u32,
    height: u32,
    channels: u32,
) -> *mut c_char {
    let Some(handle) = (unsafe { handle_ref(handle) }) else {
        return std::ptr::null_mut();
    };
    let region: &mut [u8] = if data.is_null() || len == 0 {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(data, len) }
    };
    let mut handoff = HandoffBuffer::wrap(region);
    into_c_string(handle.session.run_raw(&mut handoff, width, height, channels))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyb_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Message of the last failure on this thread, or null. Owned by the
/// library; valid until the next failing call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn pyb_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}
