//! C-ABI wrapper around `client-request`.
//!
//! # Overview
//! Lets any language with a C FFI dispatch requests and receive exactly one
//! completion per request through a plain function pointer, without knowing
//! anything about tokio or futures.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - `FfiClient` owns a multi-threaded tokio runtime; callbacks run on its
//!   worker threads, never on the dispatching thread.
//! - Request options cross the boundary as a JSON string using the same
//!   camelCase keys as `RequestOptions`. Streaming mode is not available.
//! - The completion passed to the callback is borrowed for the duration of
//!   the call. Strings returned through `out_error` are owned by the caller
//!   and released with `creq_free_string`.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use client_request::{Client, Completion, RequestOptions};
use log::warn;

use types::*;

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client with its own runtime.
///
/// Returns null if the runtime or the transport cannot be created.
/// The caller must free the returned pointer with `creq_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn creq_client_new() -> *mut FfiClient {
    catch_unwind(|| {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .thread_name("creq-worker")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(_) => return std::ptr::null_mut(),
        };
        let inner = match Client::new() {
            Ok(client) => client.with_runtime(runtime.handle().clone()),
            Err(_) => return std::ptr::null_mut(),
        };
        Box::into_raw(Box::new(FfiClient { runtime, inner }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `creq_client_new`. Safe to call with null.
///
/// Shuts the runtime down; requests still in flight are completed with an
/// `Aborted` outcome before this returns. Must not be called from inside a
/// completion callback.
#[unsafe(no_mangle)]
pub extern "C" fn creq_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let client = unsafe { Box::from_raw(client) };
            let FfiClient { runtime, inner } = *client;
            drop(inner);
            drop(runtime);
        }));
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch a request described by `options_json`.
///
/// On success returns a handle (free with `creq_handle_free`) and
/// `callback` will be called exactly once with `user_data`. On failure
/// returns null, does not call `callback`, and stores a message in
/// `*out_error` when `out_error` is not null.
#[unsafe(no_mangle)]
pub extern "C" fn creq_dispatch(
    client: *const FfiClient,
    options_json: *const c_char,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    out_error: *mut *mut c_char,
) -> *mut FfiRequestHandle {
    let user_data = UserData(user_data);
    let result = catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return Err("null argument: client".to_string());
        }
        if options_json.is_null() {
            return Err("null argument: options_json".to_string());
        }
        let Some(callback) = callback else {
            return Err("null argument: callback".to_string());
        };
        let client = unsafe { &*client };
        let json = unsafe { CStr::from_ptr(options_json) }
            .to_str()
            .map_err(|_| "options_json is not valid UTF-8".to_string())?;

        let mut options = RequestOptions::from_json(json).map_err(|err| err.to_string())?;
        if options.stream {
            warn!("streaming mode is not available over the C ABI, buffering instead");
            options.stream = false;
        }

        let handle = client
            .inner
            .dispatch(options, move |completion| {
                invoke(callback, user_data, completion)
            })
            .map_err(|err| err.to_string())?;
        Ok(Box::into_raw(Box::new(FfiRequestHandle { inner: handle })))
    }));

    let message = match result {
        Ok(Ok(handle)) => return handle,
        Ok(Err(message)) => message,
        Err(_) => "panic in creq_dispatch".to_string(),
    };
    if !out_error.is_null() {
        let message = CString::new(message).unwrap_or_default();
        unsafe { *out_error = message.into_raw() };
    }
    std::ptr::null_mut()
}

/// Hand `completion` to the C callback through a borrowed view.
fn invoke(callback: FfiCallback, user_data: UserData, completion: Completion) {
    let data = catch_unwind(AssertUnwindSafe(|| CompletionData::from_completion(completion)))
        .unwrap_or_else(|_| CompletionData::panic("panic while building completion"));
    let view = data.view();
    callback(user_data.get(), &view);
}

// ---------------------------------------------------------------------------
// Request handles
// ---------------------------------------------------------------------------

/// Ask the request to stop. Returns false for null, for a request that
/// already finished, or for one already aborted.
#[unsafe(no_mangle)]
pub extern "C" fn creq_handle_abort(handle: *const FfiRequestHandle) -> bool {
    if handle.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*handle }.inner.abort())).unwrap_or(false)
}

/// Whether the callback has been invoked. False for null.
#[unsafe(no_mangle)]
pub extern "C" fn creq_handle_is_finished(handle: *const FfiRequestHandle) -> bool {
    if handle.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*handle }.inner.is_finished())).unwrap_or(false)
}

/// Free a handle. Does not cancel the request. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn creq_handle_free(handle: *mut FfiRequestHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(handle) });
        }));
    }
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn creq_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
