//! Backend selection module.
//!
//! This module defines the available kernel backends and the process-wide
//! default used by networks that do not pick one explicitly.
//!
//! # Supported Backends
//!
//! - `Cpu`: `rayon` data-parallel kernels (default).
//! - `Wgpu`: WGSL compute pipelines through `wgpu` (requires the `wgpu` feature).
//!
//! The default is stored globally in an `AtomicU8`, so it can be switched
//! at runtime. A network captures the backend when it compiles its kernels;
//! changing the default afterwards only affects the next compilation.

use core::convert::TryFrom;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Enumeration of supported kernel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Backend {
    /// Multi-threaded CPU kernels (default).
    #[default]
    Cpu = 0,
    /// GPU compute shaders through `wgpu`.
    Wgpu,
}

impl Backend {
    /// Whether kernels for this backend can be built by this build of the crate.
    ///
    /// `Wgpu` reports `true` whenever the feature is compiled in; whether an
    /// adapter actually exists is only known once a kernel is compiled.
    pub const fn is_compiled_in(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Wgpu => cfg!(feature = "wgpu"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Wgpu => f.write_str("wgpu"),
        }
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the default backend.
///
/// Relaxed consistency is enough here: the default is read once per
/// kernel compilation, never inside a running kernel.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the default backend for kernel compilation.
///
/// # Example
///
/// ```
/// use briny_mlp::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the current default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}
