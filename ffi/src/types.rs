//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The completion handed to the C callback is a borrowed view: every pointer
//! in [`FfiCompletion`] points into a [`CompletionData`] that lives on the
//! Rust side for the duration of the callback and is freed right after it
//! returns. C code that needs the data later must copy it.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use client_request::{Completion, Error, ResponseBody, ResponseMetadata, TransportErrorKind};

/// Opaque handle owning the runtime requests run on. C callers receive a
/// pointer to this and pass it back into `creq_dispatch`.
pub struct FfiClient {
    pub(crate) runtime: tokio::runtime::Runtime,
    pub(crate) inner: client_request::Client,
}

/// Opaque handle to one in-flight request.
pub struct FfiRequestHandle {
    pub(crate) inner: client_request::RequestHandle,
}

/// Called exactly once per dispatched request, on a runtime worker thread.
pub type FfiCallback = extern "C" fn(user_data: *mut c_void, completion: *const FfiCompletion);

/// Outcome category of a completion.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Precondition = 1,
    Transport = 2,
    Aborted = 3,
    Timeout = 4,
    ResponseParse = 5,
    Status = 6,
    Panic = 7,
}

impl From<&Error> for FfiErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Precondition(_) => FfiErrorCode::Precondition,
            Error::Transport {
                kind: TransportErrorKind::Aborted,
                ..
            } => FfiErrorCode::Aborted,
            Error::Transport { .. } => FfiErrorCode::Transport,
            Error::Timeout { .. } => FfiErrorCode::Timeout,
            Error::ResponseParse(_) => FfiErrorCode::ResponseParse,
            Error::Status { .. } => FfiErrorCode::Status,
        }
    }
}

/// A single response header. Headers whose value is not valid text are
/// skipped.
#[repr(C)]
pub struct FfiHeader {
    pub name: *const c_char,
    pub value: *const c_char,
}

/// Terminal outcome of a request, valid only during the callback.
///
/// `status` is 0 and `headers` is null when no response arrived.
/// `error_message` and `error_errno` are null on success; `error_errno`
/// is a Node-style code such as `ECONNRESET` when one applies.
#[repr(C)]
pub struct FfiCompletion {
    pub error_code: FfiErrorCode,
    pub error_message: *const c_char,
    pub error_errno: *const c_char,
    pub status: u16,
    pub headers: *const FfiHeader,
    pub headers_len: usize,
    pub body: *const u8,
    pub body_len: usize,
}

/// Owned storage behind an [`FfiCompletion`].
pub(crate) struct CompletionData {
    error_code: FfiErrorCode,
    message: Option<CString>,
    errno: Option<CString>,
    status: u16,
    // Backing strings for `headers`; CString buffers do not move.
    _header_text: Vec<(CString, CString)>,
    headers: Vec<FfiHeader>,
    body: Vec<u8>,
}

impl CompletionData {
    pub(crate) fn from_completion(completion: Completion) -> Self {
        match completion {
            Ok(reply) => {
                let body = match reply.body {
                    ResponseBody::Bytes(bytes) => bytes.to_vec(),
                    ResponseBody::Json(value) => serde_json::to_vec(&value).unwrap_or_default(),
                    ResponseBody::Empty | ResponseBody::Stream(_) => Vec::new(),
                };
                Self::build(FfiErrorCode::Ok, None, None, Some(&reply.response), body)
            }
            Err(failure) => {
                let message = CString::new(failure.error.to_string()).unwrap_or_default();
                let errno = failure
                    .error
                    .code()
                    .and_then(|code| CString::new(code).ok());
                Self::build(
                    FfiErrorCode::from(&failure.error),
                    Some(message),
                    errno,
                    failure.response.as_ref(),
                    Vec::new(),
                )
            }
        }
    }

    /// Stand-in outcome when building the real one panicked.
    pub(crate) fn panic(msg: &str) -> Self {
        let message = CString::new(msg).unwrap_or_default();
        Self::build(FfiErrorCode::Panic, Some(message), None, None, Vec::new())
    }

    fn build(
        error_code: FfiErrorCode,
        message: Option<CString>,
        errno: Option<CString>,
        response: Option<&ResponseMetadata>,
        body: Vec<u8>,
    ) -> Self {
        let header_text: Vec<(CString, CString)> = response
            .map(|response| {
                response
                    .headers
                    .iter()
                    .filter_map(|(name, value)| {
                        let value = CString::new(value.to_str().ok()?).ok()?;
                        Some((CString::new(name.as_str()).ok()?, value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let headers = header_text
            .iter()
            .map(|(name, value)| FfiHeader {
                name: name.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();
        Self {
            error_code,
            message,
            errno,
            status: response.map_or(0, |response| response.status.as_u16()),
            _header_text: header_text,
            headers,
            body,
        }
    }

    /// Borrowed C view; valid while `self` is alive and unmodified.
    pub(crate) fn view(&self) -> FfiCompletion {
        FfiCompletion {
            error_code: self.error_code,
            error_message: self.message.as_deref().map_or(std::ptr::null(), |m| m.as_ptr()),
            error_errno: self.errno.as_deref().map_or(std::ptr::null(), |c| c.as_ptr()),
            status: self.status,
            headers: if self.headers.is_empty() {
                std::ptr::null()
            } else {
                self.headers.as_ptr()
            },
            headers_len: self.headers.len(),
            body: if self.body.is_empty() {
                std::ptr::null()
            } else {
                self.body.as_ptr()
            },
            body_len: self.body.len(),
        }
    }
}

/// The caller's opaque context pointer, carried to the runtime thread that
/// runs the callback.
pub(crate) struct UserData(pub(crate) *mut c_void);

impl UserData {
    pub(crate) fn get(&self) -> *mut c_void {
        self.0
    }
}

// SAFETY: the pointer is never dereferenced on the Rust side; C callers
// promise it may be used from another thread when they pass it in.
unsafe impl Send for UserData {}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, StatusCode, Version};

    use super::*;

    fn metadata(headers: HeaderMap) -> ResponseMetadata {
        ResponseMetadata {
            status: StatusCode::OK,
            headers,
            version: Version::HTTP_11,
            url: url::Url::parse("http://localhost/").unwrap(),
            remote_addr: None,
        }
    }

    #[test]
    fn view_counts_every_text_header() {
        let mut headers = HeaderMap::new();
        for n in 0..300 {
            headers.insert(
                http::HeaderName::try_from(format!("x-h{n}")).unwrap(),
                HeaderValue::from_static("v"),
            );
        }
        headers.insert("x-binary", HeaderValue::from_bytes(&[0xff]).unwrap());
        let response = metadata(headers);
        let data = CompletionData::build(FfiErrorCode::Ok, None, None, Some(&response), Vec::new());
        let view = data.view();
        assert_eq!(view.headers_len, 300);
        assert_eq!(view.status, 200);
        assert!(view.body.is_null());
        assert!(view.error_message.is_null());
    }

    #[test]
    fn view_without_response_has_no_headers() {
        let data = CompletionData::panic("boom");
        let view = data.view();
        assert_eq!(view.error_code, FfiErrorCode::Panic);
        assert_eq!(view.headers_len, 0);
        assert!(view.headers.is_null());
        assert_eq!(view.status, 0);
    }
}
