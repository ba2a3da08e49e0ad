//! Binding to the vendor haptic library, loaded at runtime.
//!
//! The library's exports are plain C functions. Every call goes through one
//! mutex because the library makes no thread-safety promise.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, OsString};
use std::os::raw::{c_char, c_float, c_int};
use std::sync::{Mutex, PoisonError};

use libloading::Library;
use relay_proto::{EngineError, EngineResult, HapticEngine, Spatial};
use tracing::{debug, info};

/// Base name of the vendor library, without platform prefix or extension.
pub const LIBRARY_NAME: &str = "bhaptics_library";

/// Every export the relay calls. Checked once at load time.
const REQUIRED_SYMBOLS: &[&str] = &[
    "registryAndInit",
    "wsIsConnected",
    "wsClose",
    "reInitMessage",
    "play",
    "playParam",
    "playWithStartTime",
    "playLoop",
    "pause",
    "resume",
    "stop",
    "stopByEventId",
    "stopAll",
    "isPlaying",
    "isPlayingByRequestId",
    "isPlayingByEventId",
    "playDot",
    "playWaveform",
    "playPath",
    "isbHapticsConnected",
    "ping",
    "pingAll",
    "swapPosition",
    "getDeviceInfoJson",
    "isPlayerInstalled",
    "isPlayerRunning",
    "launchPlayer",
    "getEventTime",
    "getHapticMappingsJson",
];

#[derive(Debug, thiserror::Error)]
pub enum NativeLoadError {
    #[error("failed to load haptic library {name:?}: {source}")]
    Library {
        name: OsString,
        #[source]
        source: libloading::Error,
    },

    #[error("haptic library is missing export `{name}`: {source}")]
    Symbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

type BoolFn = unsafe extern "C" fn() -> bool;
type VoidFn = unsafe extern "C" fn();
type StrPtrFn = unsafe extern "C" fn() -> *const c_char;
type IntBoolFn = unsafe extern "C" fn(c_int) -> bool;
type StrBoolFn = unsafe extern "C" fn(*const c_char) -> bool;
type StrIntFn = unsafe extern "C" fn(*const c_char) -> c_int;
type InitFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> bool;
type PlayParamFn =
    unsafe extern "C" fn(*const c_char, c_int, c_float, c_float, c_float, c_float) -> c_int;
type PlayWithStartTimeFn =
    unsafe extern "C" fn(*const c_char, c_int, c_int, c_float, c_float, c_float, c_float);
type PlayLoopFn = unsafe extern "C" fn(
    *const c_char,
    c_int,
    c_float,
    c_float,
    c_float,
    c_float,
    c_int,
    c_int,
) -> c_int;
type PlayDotFn = unsafe extern "C" fn(c_int, c_int, c_int, *const c_int, c_int) -> c_int;
type PlayWaveformFn =
    unsafe extern "C" fn(c_int, c_int, *const c_int, *const c_int, *const c_int, c_int) -> c_int;
type PlayPathFn = unsafe extern "C" fn(
    c_int,
    c_int,
    *const c_float,
    *const c_float,
    *const c_int,
    c_int,
) -> c_int;
type LaunchFn = unsafe extern "C" fn(bool) -> bool;

/// Engine backed by the vendor library.
pub struct NativeEngine {
    library: Mutex<Library>,
}

impl std::fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEngine").finish_non_exhaustive()
    }
}

impl NativeEngine {
    /// Loads the vendor library from the platform search path.
    pub fn load() -> Result<Self, NativeLoadError> {
        Self::load_from(libloading::library_filename(LIBRARY_NAME))
    }

    /// Loads the vendor library from an explicit file name or path and
    /// checks that every required export is present.
    pub fn load_from(name: impl Into<OsString>) -> Result<Self, NativeLoadError> {
        let name = name.into();
        // SAFETY: loading runs the library's initializers; the vendor library
        // is trusted to the same degree as the process itself.
        let library = unsafe { Library::new(&name) }.map_err(|source| NativeLoadError::Library {
            name: name.clone(),
            source,
        })?;

        for symbol in REQUIRED_SYMBOLS {
            // SAFETY: the symbol is only checked for presence, never called here.
            unsafe { library.get::<VoidFn>(symbol.as_bytes()) }
                .map_err(|source| NativeLoadError::Symbol {
                    name: *symbol,
                    source,
                })?;
        }

        info!(library = ?name, "Loaded haptic library");
        Ok(Self {
            library: Mutex::new(library),
        })
    }

    /// Resolves `symbol` as `F` and invokes `call` with it while holding the lock.
    fn with<F: Copy, T>(&self, symbol: &'static str, call: impl FnOnce(F) -> T) -> EngineResult<T> {
        let library = self.library.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: `F` matches the export's C signature as declared above.
        let function = unsafe { library.get::<F>(symbol.as_bytes()) }
            .map_err(|err| EngineError::new(format!("{symbol}: {err}")))?;
        debug!(symbol, "Native engine call");
        Ok(call(*function))
    }
}

fn c_string(value: &str) -> EngineResult<CString> {
    CString::new(value).map_err(|_| EngineError::new("argument contains a NUL byte"))
}

fn c_len(len: usize) -> EngineResult<c_int> {
    c_int::try_from(len).map_err(|_| EngineError::new("array argument is too long"))
}

/// Decodes a library-owned string; null decodes to empty.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid
/// for the duration of the call.
unsafe fn decode(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        // SAFETY: upheld by the caller.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

impl HapticEngine for NativeEngine {
    fn is_installed(&self) -> EngineResult<bool> {
        self.with("isPlayerInstalled", |f: BoolFn| unsafe { f() })
    }

    fn is_running(&self) -> EngineResult<bool> {
        self.with("isPlayerRunning", |f: BoolFn| unsafe { f() })
    }

    fn launch(&self, try_launch: bool) -> EngineResult<bool> {
        self.with("launchPlayer", |f: LaunchFn| unsafe { f(try_launch) })
    }

    fn is_connected(&self) -> EngineResult<bool> {
        self.with("wsIsConnected", |f: BoolFn| unsafe { f() })
    }

    fn close(&self) -> EngineResult<()> {
        self.with("wsClose", |f: VoidFn| unsafe { f() })
    }

    fn register_cloud(
        &self,
        api_key: &str,
        workspace: &str,
        init_data: &str,
    ) -> EngineResult<bool> {
        let (key, ws, data) = (c_string(api_key)?, c_string(workspace)?, c_string(init_data)?);
        self.with("registryAndInit", |f: InitFn| unsafe {
            f(key.as_ptr(), ws.as_ptr(), data.as_ptr())
        })
    }

    fn reinit(&self, api_key: &str, workspace: &str, json: &str) -> EngineResult<bool> {
        let (key, ws, data) = (c_string(api_key)?, c_string(workspace)?, c_string(json)?);
        self.with("reInitMessage", |f: InitFn| unsafe {
            f(key.as_ptr(), ws.as_ptr(), data.as_ptr())
        })
    }

    fn play(&self, event_id: &str) -> EngineResult<i32> {
        let event = c_string(event_id)?;
        self.with("play", |f: StrIntFn| unsafe { f(event.as_ptr()) })
    }

    fn play_param(&self, event_id: &str, request_id: i32, spatial: Spatial) -> EngineResult<i32> {
        let event = c_string(event_id)?;
        self.with("playParam", |f: PlayParamFn| unsafe {
            f(
                event.as_ptr(),
                request_id,
                spatial.intensity,
                spatial.duration,
                spatial.angle_x,
                spatial.offset_y,
            )
        })
    }

    fn play_with_start_time(
        &self,
        event_id: &str,
        request_id: i32,
        start_millis: i32,
        spatial: Spatial,
    ) -> EngineResult<()> {
        let event = c_string(event_id)?;
        self.with("playWithStartTime", |f: PlayWithStartTimeFn| unsafe {
            f(
                event.as_ptr(),
                request_id,
                start_millis,
                spatial.intensity,
                spatial.duration,
                spatial.angle_x,
                spatial.offset_y,
            );
        })
    }

    fn play_loop(
        &self,
        event_id: &str,
        request_id: i32,
        spatial: Spatial,
        interval: i32,
        max_count: i32,
    ) -> EngineResult<i32> {
        let event = c_string(event_id)?;
        self.with("playLoop", |f: PlayLoopFn| unsafe {
            f(
                event.as_ptr(),
                request_id,
                spatial.intensity,
                spatial.duration,
                spatial.angle_x,
                spatial.offset_y,
                interval,
                max_count,
            )
        })
    }

    fn pause(&self, event_id: &str) -> EngineResult<i32> {
        let event = c_string(event_id)?;
        self.with("pause", |f: StrIntFn| unsafe { f(event.as_ptr()) })
    }

    fn resume(&self, event_id: &str) -> EngineResult<bool> {
        let event = c_string(event_id)?;
        self.with("resume", |f: StrBoolFn| unsafe { f(event.as_ptr()) })
    }

    fn stop(&self, request_id: i32) -> EngineResult<bool> {
        self.with("stop", |f: IntBoolFn| unsafe { f(request_id) })
    }

    fn stop_by_event_id(&self, event_id: &str) -> EngineResult<bool> {
        let event = c_string(event_id)?;
        self.with("stopByEventId", |f: StrBoolFn| unsafe { f(event.as_ptr()) })
    }

    fn stop_all(&self) -> EngineResult<bool> {
        self.with("stopAll", |f: BoolFn| unsafe { f() })
    }

    fn play_dot(
        &self,
        request_id: i32,
        position: i32,
        duration_millis: i32,
        motors: &[i32],
    ) -> EngineResult<i32> {
        let len = c_len(motors.len())?;
        self.with("playDot", |f: PlayDotFn| unsafe {
            f(request_id, position, duration_millis, motors.as_ptr(), len)
        })
    }

    fn play_waveform(
        &self,
        request_id: i32,
        position: i32,
        motor_values: &[i32],
        play_times: &[i32],
        shape_values: &[i32],
    ) -> EngineResult<i32> {
        if play_times.len() != motor_values.len() || shape_values.len() != motor_values.len() {
            return Err(EngineError::new("waveform arrays differ in length"));
        }
        let len = c_len(motor_values.len())?;
        self.with("playWaveform", |f: PlayWaveformFn| unsafe {
            f(
                request_id,
                position,
                motor_values.as_ptr(),
                play_times.as_ptr(),
                shape_values.as_ptr(),
                len,
            )
        })
    }

    fn play_path(
        &self,
        request_id: i32,
        position: i32,
        xs: &[f32],
        ys: &[f32],
        intensities: &[i32],
    ) -> EngineResult<i32> {
        if ys.len() != xs.len() || intensities.len() != xs.len() {
            return Err(EngineError::new("path arrays differ in length"));
        }
        let len = c_len(xs.len())?;
        self.with("playPath", |f: PlayPathFn| unsafe {
            f(
                request_id,
                position,
                xs.as_ptr(),
                ys.as_ptr(),
                intensities.as_ptr(),
                len,
            )
        })
    }

    fn is_playing(&self) -> EngineResult<bool> {
        self.with("isPlaying", |f: BoolFn| unsafe { f() })
    }

    fn is_playing_by_request_id(&self, request_id: i32) -> EngineResult<bool> {
        self.with("isPlayingByRequestId", |f: IntBoolFn| unsafe { f(request_id) })
    }

    fn is_playing_by_event_id(&self, event_id: &str) -> EngineResult<bool> {
        let event = c_string(event_id)?;
        self.with("isPlayingByEventId", |f: StrBoolFn| unsafe { f(event.as_ptr()) })
    }

    fn is_device_connected(&self, position: i32) -> EngineResult<bool> {
        self.with("isbHapticsConnected", |f: IntBoolFn| unsafe { f(position) })
    }

    fn ping(&self, address: &str) -> EngineResult<bool> {
        let address = c_string(address)?;
        self.with("ping", |f: StrBoolFn| unsafe { f(address.as_ptr()) })
    }

    fn ping_all(&self) -> EngineResult<bool> {
        self.with("pingAll", |f: BoolFn| unsafe { f() })
    }

    fn swap_position(&self, address: &str) -> EngineResult<bool> {
        let address = c_string(address)?;
        self.with("swapPosition", |f: StrBoolFn| unsafe { f(address.as_ptr()) })
    }

    fn device_info_json(&self) -> EngineResult<String> {
        self.with("getDeviceInfoJson", |f: StrPtrFn| unsafe { decode(f()) })
    }

    fn mappings_json(&self) -> EngineResult<String> {
        self.with("getHapticMappingsJson", |f: StrPtrFn| unsafe { decode(f()) })
    }

    fn event_time(&self, event_id: &str) -> EngineResult<i32> {
        let event = c_string(event_id)?;
        self.with("getEventTime", |f: StrIntFn| unsafe { f(event.as_ptr()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_a_load_error() {
        let err = NativeEngine::load_from("definitely-not-a-haptic-library.so").unwrap_err();
        assert!(matches!(err, NativeLoadError::Library { .. }));
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        assert!(c_string("He\0art").is_err());
        assert_eq!(c_string("HeartBeat").unwrap().as_bytes(), b"HeartBeat");
    }

    #[test]
    fn test_null_decodes_to_empty() {
        assert_eq!(unsafe { decode(std::ptr::null()) }, "");
    }
}
