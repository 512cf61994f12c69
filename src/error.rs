use std::path::PathBuf;

use thiserror::Error;

use crate::d3d9::HRESULT;

/// An exported symbol (or the library holding it) could not be found.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unable to load {library}: {reason} (os error {code})")]
    LibraryNotFound {
        library: String,
        code: i32,
        reason: String,
    },
    #[error("unable to find {symbol} in {library}: {reason} (os error {code})")]
    SymbolNotFound {
        library: String,
        symbol: String,
        code: i32,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum DetourError {
    #[error("target {0:#x} is already detoured")]
    AlreadyHooked(usize),
    #[error("cannot detour a null address")]
    NullTarget,
    #[error("unable to patch {target:#x}: {source}")]
    Patch {
        target: usize,
        #[source]
        source: retour::Error,
    },
}

/// A native format code has no entry in the translation table.
/// Always recovered by the caller with the table's default.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unmapped native {kind} code {code:#x}")]
pub struct TranslationError {
    pub kind: &'static str,
    pub code: u32,
}

/// A counter delta does not fit the clock's time representation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("counter delta overflows the time representation")]
pub struct OverflowError;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("service {0} is already registered")]
    AlreadyRegistered(&'static str),
    #[error("no service registered for {0}")]
    MissingService(&'static str),
    #[error("the game host is already waiting for its first frame")]
    AlreadyStarting,
    #[error("no graphics device has been created yet; there is no suitable device to use")]
    NoGraphicsDevice,
    #[error("unable to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unable to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Anything that can go wrong while installing or servicing a hook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Detour(#[from] DetourError),
    #[error("native call failed with HRESULT {0:#010x}")]
    Native(HRESULT),
    #[error("device has no native handle")]
    MissingDeviceHandle,
    #[error("null {0} passed by the caller")]
    NullArgument(&'static str),
}
