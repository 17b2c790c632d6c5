//! Error types and the single path through which fatal failures terminate.
//!
//! Creation calls funnel native failures through [`verify`], which logs the
//! call site and the translated error code before terminating according to
//! the configured [`FatalPolicy`]. Recording calls have no error path at all.

use std::fmt;

use thiserror::Error;

use crate::descriptor::DescriptorHeapKind;

pub type RhiResult<T> = Result<T, RhiError>;

/// A raw native result code (an `HRESULT` on D3D12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeErrorCode(pub i32);

impl NativeErrorCode {
    pub const OUT_OF_MEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const INVALID_ARG: Self = Self(0x8007_0057_u32 as i32);
    pub const FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const DEVICE_REMOVED: Self = Self(0x887A_0005_u32 as i32);
    pub const DEVICE_HUNG: Self = Self(0x887A_0006_u32 as i32);
    pub const DEVICE_RESET: Self = Self(0x887A_0007_u32 as i32);
    pub const DRIVER_INTERNAL_ERROR: Self = Self(0x887A_0020_u32 as i32);
    pub const INVALID_CALL: Self = Self(0x887A_0001_u32 as i32);
    pub const UNSUPPORTED: Self = Self(0x887A_0004_u32 as i32);
    pub const CACHE_MISS: Self = Self(0x887A_002B_u32 as i32);

    /// The symbolic name of the code, if it is one we know.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::OUT_OF_MEMORY => "E_OUTOFMEMORY",
            Self::INVALID_ARG => "E_INVALIDARG",
            Self::FAIL => "E_FAIL",
            Self::DEVICE_REMOVED => "DXGI_ERROR_DEVICE_REMOVED",
            Self::DEVICE_HUNG => "DXGI_ERROR_DEVICE_HUNG",
            Self::DEVICE_RESET => "DXGI_ERROR_DEVICE_RESET",
            Self::DRIVER_INTERNAL_ERROR => "DXGI_ERROR_DRIVER_INTERNAL_ERROR",
            Self::INVALID_CALL => "DXGI_ERROR_INVALID_CALL",
            Self::UNSUPPORTED => "DXGI_ERROR_UNSUPPORTED",
            Self::CACHE_MISS => "D3D12_ERROR_DRIVER_VERSION_MISMATCH",
            _ => return None,
        })
    }
}

impl fmt::Display for NativeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0 as u32),
            None => write!(f, "0x{:08X}", self.0 as u32),
        }
    }
}

/// Why the driver took the device away from us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceRemovedReason {
    Hung,
    Reset,
    Removed,
    DriverInternalError,
    InvalidCall,
    Other(NativeErrorCode),
}

impl DeviceRemovedReason {
    #[must_use]
    pub fn from_code(code: NativeErrorCode) -> Self {
        match code {
            NativeErrorCode::DEVICE_HUNG => Self::Hung,
            NativeErrorCode::DEVICE_RESET => Self::Reset,
            NativeErrorCode::DEVICE_REMOVED => Self::Removed,
            NativeErrorCode::DRIVER_INTERNAL_ERROR => Self::DriverInternalError,
            NativeErrorCode::INVALID_CALL => Self::InvalidCall,
            other => Self::Other(other),
        }
    }

    /// Text shown to the user alongside the crash report.
    #[must_use]
    pub fn user_hint(self) -> &'static str {
        match self {
            Self::Hung | Self::Reset | Self::DriverInternalError => {
                "The graphics driver stopped responding. Updating your graphics driver may fix this."
            }
            Self::Removed => "The graphics device was physically removed or disabled.",
            Self::InvalidCall | Self::Other(_) => {
                "The graphics device failed unexpectedly. Updating your graphics driver may fix this."
            }
        }
    }
}

impl fmt::Display for DeviceRemovedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hung => f.write_str("device hung"),
            Self::Reset => f.write_str("device reset"),
            Self::Removed => f.write_str("device removed"),
            Self::DriverInternalError => f.write_str("driver internal error"),
            Self::InvalidCall => f.write_str("invalid call"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Failures reading or validating an on-disk pipeline cache file.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("not a pipeline cache file")]
    BadMagic,
    #[error("cache version {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("cache was hashed with algorithm {found}, expected {expected}")]
    HashAlgorithmMismatch { found: u32, expected: u32 },
    #[error("cache was written with a different shader library configuration")]
    ConfigurationMismatch,
    #[error("cache was written for a different adapter")]
    AdapterMismatch,
    #[error("cache file is corrupted: {0}")]
    Corrupted(&'static str),
}

impl DiskCacheError {
    /// Mismatches are expected after upgrades and are silently rebuilt;
    /// corruption additionally disables the cache for the process.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::BadMagic | Self::Corrupted(_))
    }
}

#[derive(Debug, Error)]
pub enum RhiError {
    #[error("{call} failed: {code}")]
    Native {
        call: &'static str,
        code: NativeErrorCode,
    },
    #[error("{0}")]
    DeviceRemoved(DeviceRemovedReason),
    #[error("out of video memory while {0}")]
    OutOfMemory(&'static str),
    #[error("descriptor heap {kind:?} exhausted (capacity {capacity})")]
    DescriptorHeapExhausted {
        kind: DescriptorHeapKind,
        capacity: u32,
    },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("pipeline state compilation failed: {0}")]
    PipelineCompile(String),
    #[error("pipeline disk cache: {0}")]
    DiskCache(#[from] DiskCacheError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RhiError {
    /// Converts a native failure into the most specific variant.
    #[must_use]
    pub fn native(call: &'static str, code: NativeErrorCode) -> Self {
        match code {
            NativeErrorCode::OUT_OF_MEMORY => Self::OutOfMemory(call),
            NativeErrorCode::DEVICE_REMOVED
            | NativeErrorCode::DEVICE_HUNG
            | NativeErrorCode::DEVICE_RESET
            | NativeErrorCode::DRIVER_INTERNAL_ERROR => {
                Self::DeviceRemoved(DeviceRemovedReason::from_code(code))
            }
            code => Self::Native { call, code },
        }
    }

    /// Whether the error leaves GPU state unrecoverable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Native { .. }
            | Self::DeviceRemoved(_)
            | Self::OutOfMemory(_)
            | Self::DescriptorHeapExhausted { .. }
            | Self::InvalidState(_) => true,
            Self::PipelineCompile(_) | Self::DiskCache(_) | Self::Io(_) => false,
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DeviceRemoved(reason) => Some(reason.user_hint()),
            Self::OutOfMemory(_) => Some(
                "Ran out of video memory. Lowering the resolution or texture quality may fix this.",
            ),
            _ => None,
        }
    }
}

/// What to do once a fatal error has been logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Unwind with a panic carrying the diagnostic.
    #[default]
    Panic,
    /// Abort the process immediately.
    Abort,
}

/// Unwraps `result`, or logs the failure with its call site and terminates.
#[track_caller]
pub fn verify<T>(result: RhiResult<T>, call_site: &'static str, policy: FatalPolicy) -> T {
    match result {
        Ok(value) => value,
        Err(error) => terminate(&error, call_site, policy),
    }
}

/// Logs `error` with full context and terminates according to `policy`.
#[track_caller]
pub fn terminate(error: &RhiError, call_site: &'static str, policy: FatalPolicy) -> ! {
    let location = std::panic::Location::caller();
    log::error!("fatal RHI error in {call_site} ({location}): {error}");

    if let Some(hint) = error.user_hint() {
        log::error!("{hint}");
    }

    match policy {
        FatalPolicy::Panic => panic!("fatal RHI error in {call_site}: {error}"),
        FatalPolicy::Abort => std::process::abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_codes_are_translated() {
        assert_eq!(
            NativeErrorCode::DEVICE_HUNG.to_string(),
            "DXGI_ERROR_DEVICE_HUNG (0x887A0006)"
        );
        assert_eq!(NativeErrorCode(0x1234).to_string(), "0x00001234");

        assert!(matches!(
            RhiError::native("CreateCommittedResource", NativeErrorCode::OUT_OF_MEMORY),
            RhiError::OutOfMemory("CreateCommittedResource")
        ));
        assert!(matches!(
            RhiError::native("Present", NativeErrorCode::DEVICE_HUNG),
            RhiError::DeviceRemoved(DeviceRemovedReason::Hung)
        ));
    }

    #[test]
    fn classification() {
        assert!(RhiError::OutOfMemory("x").is_fatal());
        assert!(!RhiError::DiskCache(DiskCacheError::BadMagic).is_fatal());
        assert!(DiskCacheError::Corrupted("truncated").is_corruption());
        assert!(!DiskCacheError::ConfigurationMismatch.is_corruption());
    }

    #[test]
    #[should_panic(expected = "fatal RHI error in create_texture")]
    fn verify_panics_on_error() {
        let result: RhiResult<()> = Err(RhiError::OutOfMemory("creating a texture"));
        verify(result, "create_texture", FatalPolicy::Panic);
    }
}
