//! C ABI for linking wearsync-core as a static library from Android (NDK) hosts.
//! The host keeps the platform transport; these calls cover the codec and the watch-side state.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::exchange::{SinkEvent, SinkExchange};
use crate::forecast::ForecastSnapshot;
use crate::payload;
use crate::protocol::{self, MESSAGE_PATH, PROTOCOL_VERSION};

/// Field selectors for `wearsync_sink_field`.
pub const FIELD_ICON: c_int = 0;
pub const FIELD_MIN_TEMP: c_int = 1;
pub const FIELD_MAX_TEMP: c_int = 2;

/// Returns the current protocol version.
#[no_mangle]
pub extern "C" fn wearsync_version() -> u8 {
    PROTOCOL_VERSION
}

/// Copy the message path (UTF-8, no NUL) into out_buf. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn wearsync_message_path(out_buf: *mut u8, out_buf_len: usize) -> c_int {
    copy_out(MESSAGE_PATH.as_bytes(), out_buf, out_buf_len)
}

/// Returns 1 if body is the ready sentinel, 0 if not, -1 if body is null.
#[no_mangle]
pub extern "C" fn wearsync_is_ready_request(body: *const u8, body_len: usize) -> c_int {
    if body.is_null() {
        return -1;
    }
    let body = unsafe { slice::from_raw_parts(body, body_len) };
    protocol::is_ready_request(body) as c_int
}

/// Build a forecast response body from icon bytes and two UTF-8 temperature strings.
/// Returns bytes written, or -1 on error (null input, invalid UTF-8, oversized segment,
/// out_buf too small).
#[no_mangle]
pub extern "C" fn wearsync_encode_payload(
    icon: *const u8,
    icon_len: usize,
    min_temp: *const u8,
    min_temp_len: usize,
    max_temp: *const u8,
    max_temp_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if icon.is_null() || min_temp.is_null() || max_temp.is_null() {
        return -1;
    }
    let (icon, min_temp, max_temp) = unsafe {
        (
            slice::from_raw_parts(icon, icon_len),
            slice::from_raw_parts(min_temp, min_temp_len),
            slice::from_raw_parts(max_temp, max_temp_len),
        )
    };
    let (min_temp, max_temp) = match (std::str::from_utf8(min_temp), std::str::from_utf8(max_temp)) {
        (Ok(min), Ok(max)) => (min, max),
        _ => return -1,
    };
    let snapshot = ForecastSnapshot::new(icon.to_vec(), min_temp, max_temp);
    match payload::encode(&snapshot).to_bytes() {
        Ok(bytes) => copy_out(&bytes, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Create a watch-side exchange. Returns opaque handle; destroy with `wearsync_sink_destroy`.
#[no_mangle]
pub extern "C" fn wearsync_sink_create() -> *mut c_void {
    Box::into_raw(Box::new(SinkExchange::new())) as *mut c_void
}

/// Destroy sink instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn wearsync_sink_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut SinkExchange) };
}

/// Link connected. Returns 1 if the host should send the ready sentinel to every connected
/// peer now (first connection of this instance), 0 otherwise, -1 if h is null.
#[no_mangle]
pub extern "C" fn wearsync_sink_on_connected(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let sink = unsafe { &mut *(h as *mut SinkExchange) };
    sink.ready_request_due() as c_int
}

/// Message received. Returns 1 if a new forecast was stored (redraw), 0 if the path is not ours,
/// -1 on error (null input or undecodable payload; previous forecast is kept).
#[no_mangle]
pub extern "C" fn wearsync_sink_on_message(
    h: *mut c_void,
    path: *const u8,
    path_len: usize,
    body: *const u8,
    body_len: usize,
) -> c_int {
    if h.is_null() || path.is_null() || body.is_null() {
        return -1;
    }
    let sink = unsafe { &mut *(h as *mut SinkExchange) };
    let path = unsafe { slice::from_raw_parts(path, path_len) };
    let Ok(path) = std::str::from_utf8(path) else {
        return 0;
    };
    let body = unsafe { slice::from_raw_parts(body, body_len) };
    match sink.on_message(path, body) {
        SinkEvent::Redraw => 1,
        SinkEvent::Ignored => 0,
        SinkEvent::Discarded(_) => -1,
    }
}

/// Copy one field of the latest forecast into out_buf (see FIELD_* constants).
/// With a null out_buf, returns the field's length without copying.
/// Returns bytes written (or required), or -1 if no forecast yet, unknown field, or out_buf too small.
#[no_mangle]
pub extern "C" fn wearsync_sink_field(
    h: *mut c_void,
    field: c_int,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() {
        return -1;
    }
    let sink = unsafe { &*(h as *const SinkExchange) };
    let Some(snapshot) = sink.latest() else {
        return -1;
    };
    let bytes = match field {
        FIELD_ICON => snapshot.icon(),
        FIELD_MIN_TEMP => snapshot.min_temp().as_bytes(),
        FIELD_MAX_TEMP => snapshot.max_temp().as_bytes(),
        _ => return -1,
    };
    if out_buf.is_null() {
        return c_int::try_from(bytes.len()).unwrap_or(-1);
    }
    copy_out(bytes, out_buf, out_buf_len)
}

fn copy_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len || bytes.len() > c_int::MAX as usize {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}
