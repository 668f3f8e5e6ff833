//! FFI bindings for Synheart Guide
//!
//! This module provides C-compatible functions for driving the synchronous guidance
//! pipeline from other languages. All functions use C strings (null-terminated) and
//! return allocated memory that must be freed by the caller using `guide_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::capture::HostEvent;
use crate::config::GuideConfig;
use crate::insight::fallback_insight;
use crate::pipeline::GuidancePipeline;
use crate::types::BehaviorAnalysis;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

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

fn to_json_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Run the local fallback rules over a serialized analysis.
///
/// # Safety
/// - `analysis_json` must be a valid null-terminated C string.
/// - Returns a newly allocated insight JSON string that must be freed with `guide_free_string`.
/// - Returns NULL when no rule applies (last error unset) or on error (last error set).
#[no_mangle]
pub unsafe extern "C" fn guide_fallback_insight(analysis_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(analysis_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid analysis string pointer");
            return ptr::null_mut();
        }
    };

    let analysis: BehaviorAnalysis = match serde_json::from_str(&json_str) {
        Ok(a) => a,
        Err(e) => {
            set_last_error(&format!("Invalid analysis JSON: {}", e));
            return ptr::null_mut();
        }
    };

    match fallback_insight(&analysis) {
        Some(insight) => to_json_cstr(&insight),
        None => ptr::null_mut(),
    }
}

// ============================================================================
// Stateful Pipeline API
// ============================================================================

/// Opaque handle to a GuidancePipeline
pub struct GuidePipelineHandle {
    pipeline: GuidancePipeline,
}

/// Create a pipeline from a JSON configuration.
///
/// # Safety
/// - `config_json` may be NULL (reference defaults) or a valid null-terminated C string.
/// - Must be freed with `guide_pipeline_free`.
/// - Returns NULL on error; call `guide_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_new(
    config_json: *const c_char,
) -> *mut GuidePipelineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        GuideConfig::default()
    } else {
        let json_str = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match GuideConfig::from_json(&json_str) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    if let Err(e) = config.validate() {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }

    let handle = Box::new(GuidePipelineHandle {
        pipeline: GuidancePipeline::new(&config),
    });
    Box::into_raw(handle)
}

/// Free a pipeline.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_free(handle: *mut GuidePipelineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Record one host event.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`.
/// - `event_json` must be a valid null-terminated C string.
/// - Returns 1 when an eager aggregation cycle is due, 0 otherwise, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_record(
    handle: *mut GuidePipelineHandle,
    event_json: *const c_char,
    now_ms: f64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    let handle = &mut *handle;

    let json_str = match cstr_to_string(event_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid event string pointer");
            return -1;
        }
    };

    let event: HostEvent = match serde_json::from_str(&json_str) {
        Ok(e) => e,
        Err(e) => {
            set_last_error(&format!("Invalid event JSON: {}", e));
            return -1;
        }
    };

    i32::from(handle.pipeline.record(&event, now_ms).flush_due)
}

/// Run one aggregation cycle with the local rules.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`.
/// - Returns the surfaced insight event as JSON (free with `guide_free_string`), or NULL
///   when nothing was surfaced. NULL with a last error set means failure.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_tick(
    handle: *mut GuidePipelineHandle,
    now_ms: f64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    match handle.pipeline.process_local(now_ms) {
        Some(event) => to_json_cstr(&event),
        None => ptr::null_mut(),
    }
}

/// Latest metrics and intent as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`.
/// - Returns a newly allocated string (free with `guide_free_string`); the JSON is `null`
///   before the first cycle. Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_snapshot(handle: *mut GuidePipelineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    to_json_cstr(&handle.pipeline.latest())
}

/// Attach a description of the visible content to every following analysis.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`.
/// - `context_json` must be a valid null-terminated C string, or NULL to clear the context.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_set_content_context(
    handle: *mut GuidePipelineHandle,
    context_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    let handle = &mut *handle;

    if context_json.is_null() {
        handle.pipeline.set_content_context(None);
        return 0;
    }
    let Some(json) = cstr_to_string(context_json) else {
        set_last_error("Invalid content context string pointer");
        return -1;
    };
    match serde_json::from_str::<serde_json::Value>(&json) {
        Ok(context) => {
            handle.pipeline.set_content_context(Some(context));
            0
        }
        Err(e) => {
            set_last_error(&format!("Invalid content context JSON: {}", e));
            -1
        }
    }
}

/// Acknowledge the active insight.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `guide_pipeline_new`.
/// - `event_id` must be a valid null-terminated C string.
/// - Returns 1 if the insight was active, 0 if not, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn guide_pipeline_acknowledge(
    handle: *mut GuidePipelineHandle,
    event_id: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    let handle = &mut *handle;

    match cstr_to_string(event_id) {
        Some(id) => i32::from(handle.pipeline.acknowledge(&id)),
        None => {
            set_last_error("Invalid event id string pointer");
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Guide functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Guide function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn guide_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Guide function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn guide_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Guide library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn guide_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
