use thiserror::Error;

use crate::KeyChord;

/// The main error type for keyhook operations
#[derive(Error, Debug)]
pub enum Error {
    /// Error parsing a key or key chord from text
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The chord cannot be used as a shortcut (no key, lock keys, bare modifiers, Ctrl+Alt+Del)
    #[error("Key combination '{0}' is not valid")]
    InvalidCombination(KeyChord),

    /// Another hook in the same context already holds an equal chord
    #[error("The combination '{0}' is already in use")]
    CombinationInUse(KeyChord),

    /// The operation is not allowed in the hook's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// The hook has been disposed
    #[error("Hook has been disposed")]
    Disposed,

    /// Installing a native hook failed. `code` is the Win32 error code, or
    /// the raw HRESULT when the failure did not come from a Win32 call.
    #[error("Platform error (code {code})")]
    Platform { code: i32 },

    /// The platform delivered a key message outside the up/down set
    #[error("Unexpected key state message: {0:#06x}")]
    UnexpectedKeyState(usize),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unwrap a Win32 error code from an HRESULT built by `HRESULT_FROM_WIN32`
#[cfg_attr(not(windows), allow(dead_code))]
fn platform_code(hresult: i32) -> i32 {
    const FACILITY_WIN32: i32 = 7;
    if hresult < 0 && (hresult >> 16) & 0x1FFF == FACILITY_WIN32 {
        hresult & 0xFFFF
    } else {
        hresult
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for Error {
    fn from(err: windows::core::Error) -> Self {
        Error::Platform {
            code: platform_code(err.code().0),
        }
    }
}
