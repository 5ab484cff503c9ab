//! FFI bindings for the VitaBand alert engine
//!
//! This module provides C-compatible functions for calling the engine from
//! mobile hosts. All data crosses the boundary as JSON in null-terminated C
//! strings. Returned strings must be freed by the caller using
//! `vitaband_free_string`.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use serde::Serialize;

use crate::classifier::classify_vitals;
use crate::engine::{AlertEngine, EngineOptions};
use crate::error::CallError;
use crate::escalation::{AttemptId, EscalationPrompt, Notice, PromptResponse, Telephony, UserPrompt};
use crate::insights::InsightGenerator;
use crate::runtime::SharedEngine;
use crate::types::{EmergencyConfig, VitalsReading};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize a value to a newly allocated C string, or NULL with last error set
fn to_json_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

unsafe fn parse_reading(json: *const c_char) -> Option<VitalsReading> {
    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid reading string pointer");
            return None;
        }
    };

    match VitalsReading::from_json(&json_str) {
        Ok(reading) => Some(reading),
        Err(e) => {
            set_last_error(&e.to_string());
            None
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Classify a reading JSON against the default bands and return an alerts
/// JSON array.
///
/// # Safety
/// - `reading_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL on error; call `vitaband_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitaband_classify(reading_json: *const c_char) -> *mut c_char {
    clear_last_error();

    match parse_reading(reading_json) {
        Some(reading) => to_json_cstr(&classify_vitals(&reading)),
        None => ptr::null_mut(),
    }
}

/// Classify a reading JSON and return the resulting insights JSON array.
///
/// # Safety
/// - `reading_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL on error; call `vitaband_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitaband_insights(reading_json: *const c_char) -> *mut c_char {
    clear_last_error();

    match parse_reading(reading_json) {
        Some(reading) => {
            let alerts = classify_vitals(&reading);
            to_json_cstr(&InsightGenerator::generate(&reading, &alerts))
        }
        None => ptr::null_mut(),
    }
}

// ============================================================================
// Engine API
// ============================================================================

/// Host callback placing a call. Returns 0 on success.
pub type PlaceCallFn = extern "C" fn(number: *const c_char, user_data: *mut c_void) -> i32;

/// Host callback receiving a JSON document (prompt or notice)
pub type JsonCallbackFn = extern "C" fn(json: *const c_char, user_data: *mut c_void);

/// Host callbacks plus their opaque context pointer
#[derive(Clone, Copy)]
struct HostCallbacks {
    place_call: PlaceCallFn,
    on_prompt: Option<JsonCallbackFn>,
    on_notice: Option<JsonCallbackFn>,
    user_data: *mut c_void,
}

// The host guarantees `user_data` may be used from any thread
unsafe impl Send for HostCallbacks {}
unsafe impl Sync for HostCallbacks {}

impl HostCallbacks {
    fn emit<T: Serialize>(&self, callback: Option<JsonCallbackFn>, value: &T) {
        let Some(callback) = callback else {
            return;
        };
        if let Ok(json) = serde_json::to_string(value) {
            if let Ok(cstr) = CString::new(json) {
                callback(cstr.as_ptr(), self.user_data);
            }
        }
    }
}

impl Telephony for HostCallbacks {
    fn place_call(&self, number: &str) -> Result<(), CallError> {
        let number = CString::new(number).map_err(|e| CallError(e.to_string()))?;
        match (self.place_call)(number.as_ptr(), self.user_data) {
            0 => Ok(()),
            code => Err(CallError(format!("host dialer returned {}", code))),
        }
    }
}

impl UserPrompt for HostCallbacks {
    fn prompt(&self, prompt: &EscalationPrompt) -> PromptResponse {
        self.emit(self.on_prompt, prompt);
        // Answers come back through vitaband_engine_cancel / _call_now
        PromptResponse::Deferred
    }

    fn confirm_call(&self, _number: &str) -> bool {
        // Manual calls through FFI are confirmed by the host before the call
        true
    }

    fn notice(&self, notice: &Notice) {
        self.emit(self.on_notice, notice);
    }
}

/// Opaque handle to an engine
pub struct VitabandEngineHandle {
    engine: SharedEngine,
}

/// Create a new engine.
///
/// Callbacks may be invoked from a background thread when the countdown
/// fires. They run without the engine locked, so `on_prompt` may answer by
/// calling `vitaband_engine_cancel` or `vitaband_engine_call_now`, and
/// `on_notice` may call `vitaband_engine_set_config`.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - `place_call` must be a valid function pointer; `on_prompt` and `on_notice` may be NULL.
/// - `user_data` is passed back to every callback and must stay valid until the
///   engine is freed.
/// - Must be freed with `vitaband_engine_free`. Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_new(
    config_json: *const c_char,
    place_call: PlaceCallFn,
    on_prompt: Option<JsonCallbackFn>,
    on_notice: Option<JsonCallbackFn>,
    user_data: *mut c_void,
) -> *mut VitabandEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EmergencyConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| "Invalid config string pointer".to_string())
            .and_then(|s| EmergencyConfig::from_json(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(msg) => {
                set_last_error(&msg);
                return ptr::null_mut();
            }
        }
    };

    let callbacks = Arc::new(HostCallbacks {
        place_call,
        on_prompt,
        on_notice,
        user_data,
    });
    let options = EngineOptions {
        config,
        ..EngineOptions::default()
    };
    let engine = AlertEngine::new(options, callbacks.clone(), callbacks);

    Box::into_raw(Box::new(VitabandEngineHandle {
        engine: SharedEngine::new(engine),
    }))
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_free(engine: *mut VitabandEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Replace the engine's emergency settings.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - `config_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_set_config(
    engine: *mut VitabandEngineHandle,
    config_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }

    let handle = &*engine;

    let json_str = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string pointer");
            return -1;
        }
    };

    match EmergencyConfig::from_json(&json_str) {
        Ok(config) => {
            handle.engine.set_config(config);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Process a reading and return the reading report JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - `reading_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL on error; call `vitaband_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_on_reading(
    engine: *mut VitabandEngineHandle,
    reading_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;

    match parse_reading(reading_json) {
        Some(reading) => to_json_cstr(&handle.engine.on_reading(&reading)),
        None => ptr::null_mut(),
    }
}

/// Cancel a pending escalation and return the outcome JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL if the attempt is unknown or already resolved.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_cancel(
    engine: *mut VitabandEngineHandle,
    attempt: u64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    match (*engine).engine.cancel(AttemptId(attempt)) {
        Ok(outcome) => to_json_cstr(&outcome),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Place the call for a pending escalation now and return the outcome JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL if the attempt is unknown or already resolved.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_call_now(
    engine: *mut VitabandEngineHandle,
    attempt: u64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    match (*engine).engine.call_now(AttemptId(attempt)) {
        Ok(outcome) => to_json_cstr(&outcome),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Fire the countdown if its deadline has passed and return the outcome JSON.
///
/// Hosts normally rely on the engine's own timer; this lets them drive it
/// from their event loop instead.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - Returns a newly allocated string that must be freed with `vitaband_free_string`.
/// - Returns NULL if nothing was due.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_poll(engine: *mut VitabandEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    match (*engine).engine.poll() {
        Some(outcome) => to_json_cstr(&outcome),
        None => ptr::null_mut(),
    }
}

/// Place a user-initiated emergency call (already confirmed by the host).
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitaband_engine_new`.
/// - `number` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn vitaband_engine_manual_call(
    engine: *mut VitabandEngineHandle,
    number: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }

    let number = match cstr_to_string(number) {
        Some(s) => s,
        None => {
            set_last_error("Invalid number string pointer");
            return -1;
        }
    };

    match (*engine).engine.manual_call(&number) {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by VitaBand functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a VitaBand function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vitaband_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next VitaBand function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn vitaband_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn vitaband_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
