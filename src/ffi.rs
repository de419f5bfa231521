//! FFI bindings for Strider
//!
//! This module provides C-compatible functions for driving the tracker from a
//! mobile host. Structured values cross the boundary as JSON C strings, which
//! must be freed by the caller using `strider_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tokio::runtime::Runtime;

use crate::config::TrackerConfig;
use crate::context::TrackerContext;
use crate::error::TrackerError;
use crate::sensor::{ChannelDetector, PulseSender};
use crate::service::{ServiceCommand, StepService};
use crate::types::{BiometricProfile, Pulse};

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

/// Report a JSON result or record the error and return NULL
fn json_or_null(result: Result<String, TrackerError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Report success as 0 or record the error and return -1
fn status_code(result: Result<(), TrackerError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Tracker API
// ============================================================================

/// Opaque handle to a running tracker
pub struct StriderTrackerHandle {
    runtime: Runtime,
    context: TrackerContext,
    service: StepService,
    pulses: PulseSender,
}

impl StriderTrackerHandle {
    fn open(data_dir: Option<String>) -> Result<Self, TrackerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("strider")
            .enable_all()
            .build()?;

        let context = match data_dir {
            Some(dir) => TrackerContext::open(TrackerConfig::load(dir)?)?,
            None => TrackerContext::in_memory(TrackerConfig::default()),
        };
        let (detector, pulses) = ChannelDetector::new();
        let service = context.service(Box::new(detector));

        Ok(Self {
            runtime,
            context,
            service,
            pulses,
        })
    }

    fn command(&mut self, command: ServiceCommand) -> Result<String, TrackerError> {
        let status = self.runtime.block_on(self.service.handle(command))?;
        Ok(serde_json::to_string(&status)?)
    }

    fn pulse(&self, epoch_ms: i64) -> Result<(), TrackerError> {
        if !self.service.is_running() {
            return Err(TrackerError::ServiceNotRunning);
        }
        let at = if epoch_ms > 0 {
            DateTime::<Utc>::from_timestamp_millis(epoch_ms)
                .ok_or_else(|| TrackerError::InvalidDate(format!("epoch ms {}", epoch_ms)))?
        } else {
            Utc::now()
        };
        self.pulses
            .try_send(Pulse::new(at))
            .map_err(TrackerError::from)
    }

    fn day_summary(&self, date: &str, utc_offset_minutes: i32) -> Result<String, TrackerError> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| TrackerError::InvalidDate(format!("{}: {}", date, e)))?;
        let tz = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            TrackerError::InvalidDate(format!("UTC offset {} minutes", utc_offset_minutes))
        })?;
        let summary = self.context.day_summary(date, &tz)?;
        Ok(serde_json::to_string(&summary)?)
    }

    fn save_profile(&self, json: &str) -> Result<(), TrackerError> {
        let profile: BiometricProfile = serde_json::from_str(json)?;
        self.context.biometrics().save(profile)
    }
}

/// Create a tracker storing its data in `data_dir`.
///
/// # Safety
/// - `data_dir` must be a valid null-terminated C string, or NULL for a
///   tracker that keeps everything in memory.
/// - Must be freed with `strider_tracker_free`.
/// - Returns NULL on error; call `strider_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_new(data_dir: *const c_char) -> *mut StriderTrackerHandle {
    clear_last_error();

    let dir = if data_dir.is_null() {
        None
    } else {
        match cstr_to_string(data_dir) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid data_dir string pointer");
                return ptr::null_mut();
            }
        }
    };

    match StriderTrackerHandle::open(dir) {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop and free a tracker.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_free(tracker: *mut StriderTrackerHandle) {
    if !tracker.is_null() {
        let mut handle = Box::from_raw(tracker);
        let h = &mut *handle;
        if let Err(e) = h.runtime.block_on(h.service.stop()) {
            log::warn!("tracker stopped with error: {}", e);
        }
        drop(handle);
    }
}

/// START the foreground service and return its status as JSON.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - Returns a newly allocated string that must be freed with `strider_free_string`.
/// - Returns NULL on error (including a missing sensor); call `strider_last_error`.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_start(tracker: *mut StriderTrackerHandle) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }

    let handle = &mut *tracker;
    json_or_null(handle.command(ServiceCommand::Start))
}

/// STOP the foreground service and return its status as JSON.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - Returns a newly allocated string that must be freed with `strider_free_string`.
/// - Returns NULL on error; call `strider_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_stop(tracker: *mut StriderTrackerHandle) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }

    let handle = &mut *tracker;
    json_or_null(handle.command(ServiceCommand::Stop))
}

/// Deliver one step detector pulse.
///
/// `epoch_ms` is the detection time in Unix milliseconds; 0 or less means now.
/// The pulse is queued and classified asynchronously.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - Returns 0 on success, non-zero on error (not running, queue full).
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_pulse(tracker: *mut StriderTrackerHandle, epoch_ms: i64) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }

    let handle = &*tracker;
    status_code(handle.pulse(epoch_ms))
}

/// Current walk speed category (`"STILL"`, `"SLOW"`, `"MEDIUM"`, `"FAST"`).
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - Returns a newly allocated string that must be freed with `strider_free_string`.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_walk_speed(tracker: *mut StriderTrackerHandle) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }

    let handle = &*tracker;
    string_to_cstr(handle.service.walk_speed().as_str())
}

/// Current MET estimate; NaN for a NULL tracker.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_met(tracker: *mut StriderTrackerHandle) -> f64 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return f64::NAN;
    }

    let handle = &*tracker;
    handle.service.met()
}

/// Day summary for `date` (`YYYY-MM-DD`) in a zone `utc_offset_minutes` east of UTC.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - `date` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `strider_free_string`.
/// - Returns NULL on error; call `strider_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_day_summary(
    tracker: *mut StriderTrackerHandle,
    date: *const c_char,
    utc_offset_minutes: i32,
) -> *mut c_char {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return ptr::null_mut();
    }

    let handle = &*tracker;

    let date_str = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date string pointer");
            return ptr::null_mut();
        }
    };

    json_or_null(handle.day_summary(&date_str, utc_offset_minutes))
}

/// Validate and save the biometric profile from JSON
/// (`{"name", "gender", "height_cm", "weight_kg"}`).
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error; nothing is saved on error.
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_save_profile(
    tracker: *mut StriderTrackerHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }

    let handle = &*tracker;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    status_code(handle.save_profile(&json_str))
}

/// Save the daily step goal.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `strider_tracker_new`.
/// - Returns 0 on success, non-zero on error (goal of zero).
#[no_mangle]
pub unsafe extern "C" fn strider_tracker_save_goal(tracker: *mut StriderTrackerHandle, goal: u64) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }

    let handle = &*tracker;
    status_code(handle.context.preferences().save_goal(goal))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Strider functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Strider function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn strider_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Strider function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn strider_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Strider library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn strider_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
