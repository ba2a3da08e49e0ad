//! Engine implementations behind the [`relay_proto::HapticEngine`] seam.

#[cfg(feature = "native")]
mod native;
mod simulated;

#[cfg(feature = "native")]
pub use native::{LIBRARY_NAME, NativeEngine, NativeLoadError};
pub use simulated::{EngineCall, SimulatedEngine};
