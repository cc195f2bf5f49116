//! FFI bindings for Synheart Vitality
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages (on-device scoring). All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `vitality_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::pipeline::{EngineSettings, VitalityEngine};
use crate::schema::{ScoringSchema, ThresholdConfig};
use crate::types::{DailyRawMetrics, DailyValue, PatternMetric, PatternType, VitalitySnapshot};

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

/// Unwrap a result into a C string, recording the error on failure
fn finish(result: Result<String, ComputeError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Single-day scoring response
#[derive(Debug, Serialize)]
struct ScoreResponse {
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<VitalitySnapshot>,
}

/// Pattern evaluation request
#[derive(Debug, Deserialize)]
struct PatternRequest {
    metric: PatternMetric,
    pattern_type: PatternType,
    date: NaiveDate,
    series: Vec<DailyValue>,
}

fn score_day_json(engine: &VitalityEngine, age: u32, row_json: &str) -> Result<String, ComputeError> {
    let row: DailyRawMetrics = serde_json::from_str(row_json)?;
    let snapshot = engine.score_day(age, &row);
    let response = ScoreResponse {
        eligible: snapshot.is_some(),
        snapshot,
    };
    Ok(serde_json::to_string(&response)?)
}

fn evaluate_pattern_json(engine: &VitalityEngine, request_json: &str) -> Result<String, ComputeError> {
    let request: PatternRequest = serde_json::from_str(request_json)?;
    let evaluation = engine.evaluate_pattern(
        request.metric,
        request.pattern_type,
        &request.series,
        request.date,
    )?;
    Ok(serde_json::to_string(&evaluation)?)
}

// ============================================================================
// Stateless API (built-in configuration)
// ============================================================================

/// Score one day's metrics with the built-in schema.
///
/// `row_json` is a daily row (`person_id`, `date` and any metric fields). The result is
/// `{"eligible": bool, "snapshot": {...}}`.
///
/// # Safety
/// - `row_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitality_free_string`.
/// - Returns NULL on error; call `vitality_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitality_score_day(age: u32, row_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let row = match cstr_to_string(row_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid row string pointer");
            return ptr::null_mut();
        }
    };

    finish(
        VitalityEngine::builtin(EngineSettings::default())
            .and_then(|engine| score_day_json(&engine, age, &row)),
    )
}

/// Evaluate one pattern with the built-in threshold table.
///
/// `request_json` is `{"metric", "pattern_type", "date", "series": [{"date", "value"}]}`.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitality_free_string`.
/// - Returns NULL on error; call `vitality_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitality_evaluate_pattern(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let request = match cstr_to_string(request_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid request string pointer");
            return ptr::null_mut();
        }
    };

    finish(
        VitalityEngine::builtin(EngineSettings::default())
            .and_then(|engine| evaluate_pattern_json(&engine, &request)),
    )
}

// ============================================================================
// Engine API (custom configuration)
// ============================================================================

/// Opaque handle to a VitalityEngine
pub struct VitalityEngineHandle {
    engine: VitalityEngine,
}

/// Create an engine from scoring schema and threshold JSON documents.
///
/// Either pointer may be NULL to use the built-in document.
///
/// # Safety
/// - Non-NULL arguments must be valid null-terminated C strings.
/// - Returns a pointer that must be freed with `vitality_engine_free`.
/// - Returns NULL if a document fails validation; call `vitality_last_error`.
#[no_mangle]
pub unsafe extern "C" fn vitality_engine_new(
    schema_json: *const c_char,
    thresholds_json: *const c_char,
) -> *mut VitalityEngineHandle {
    clear_last_error();

    let schema = match cstr_to_string(schema_json) {
        Some(json) => ScoringSchema::from_json(&json),
        None => Ok(ScoringSchema::builtin()),
    };
    let thresholds = match cstr_to_string(thresholds_json) {
        Some(json) => ThresholdConfig::from_json(&json),
        None => Ok(ThresholdConfig::builtin()),
    };

    let engine = schema.and_then(|schema| {
        thresholds.and_then(|thresholds| {
            VitalityEngine::new(schema, thresholds, EngineSettings::default())
        })
    });

    match engine {
        Ok(engine) => Box::into_raw(Box::new(VitalityEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitality_engine_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vitality_engine_free(engine: *mut VitalityEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Score one day's metrics with an engine's schema.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitality_engine_new`.
/// - `row_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitality_free_string`.
/// - Returns NULL on error; call `vitality_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitality_engine_score_day(
    engine: *const VitalityEngineHandle,
    age: u32,
    row_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let row = match cstr_to_string(row_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid row string pointer");
            return ptr::null_mut();
        }
    };

    finish(score_day_json(&handle.engine, age, &row))
}

/// Evaluate one pattern with an engine's threshold table.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `vitality_engine_new`.
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitality_free_string`.
/// - Returns NULL on error; call `vitality_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitality_engine_evaluate_pattern(
    engine: *const VitalityEngineHandle,
    request_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let request = match cstr_to_string(request_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid request string pointer");
            return ptr::null_mut();
        }
    };

    finish(evaluate_pattern_json(&handle.engine, &request))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Vitality functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Vitality function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vitality_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Vitality function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn vitality_last_error() -> *const c_char {
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
pub unsafe extern "C" fn vitality_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
