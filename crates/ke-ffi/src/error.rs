use std::cell::RefCell;
use std::ffi::CString;

use ke_core::EngineError;
use log::debug;

use crate::types::KeStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `ke_last_error`.
pub fn set_last_error(msg: String) {
    debug!("ffi error: {}", msg);
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` and return its status code.
pub(crate) fn fail(err: EngineError) -> KeStatus {
    let status = KeStatus::from(&err);
    set_last_error(err.to_string());
    status
}

pub(crate) fn invalid(msg: &str) -> KeStatus {
    set_last_error(msg.to_string());
    KeStatus::InvalidArgument
}
