//! The haptic engine seam.
//!
//! The engine (device discovery, pattern playback, cloud registration) is an
//! external collaborator. The relay only ever talks to it through
//! [`HapticEngine`], so tests and dry runs can substitute their own engine.

/// Failure raised by an engine call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Spatial playback parameters shared by the parameterized play calls.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spatial {
    /// Intensity multiplier (0.0 to 1.0).
    pub intensity: f32,
    /// Duration multiplier.
    pub duration: f32,
    /// Rotation around the X axis.
    pub angle_x: f32,
    /// Vertical offset.
    pub offset_y: f32,
}

/// The fixed call surface the relay is permitted to invoke.
///
/// Calls may arrive concurrently from different ingestion tasks. An
/// implementation that cannot handle that must serialize internally.
pub trait HapticEngine: Send + Sync {
    // Companion process lifecycle
    fn is_installed(&self) -> EngineResult<bool>;
    fn is_running(&self) -> EngineResult<bool>;
    fn launch(&self, try_launch: bool) -> EngineResult<bool>;

    // Connectivity
    fn is_connected(&self) -> EngineResult<bool>;
    fn close(&self) -> EngineResult<()>;

    // Registration
    fn register_cloud(&self, api_key: &str, workspace: &str, init_data: &str)
    -> EngineResult<bool>;
    fn reinit(&self, api_key: &str, workspace: &str, json: &str) -> EngineResult<bool>;

    // Event playback
    fn play(&self, event_id: &str) -> EngineResult<i32>;
    fn play_param(&self, event_id: &str, request_id: i32, spatial: Spatial)
    -> EngineResult<i32>;
    fn play_with_start_time(
        &self,
        event_id: &str,
        request_id: i32,
        start_millis: i32,
        spatial: Spatial,
    ) -> EngineResult<()>;
    fn play_loop(
        &self,
        event_id: &str,
        request_id: i32,
        spatial: Spatial,
        interval: i32,
        max_count: i32,
    ) -> EngineResult<i32>;
    fn pause(&self, event_id: &str) -> EngineResult<i32>;
    fn resume(&self, event_id: &str) -> EngineResult<bool>;
    fn stop(&self, request_id: i32) -> EngineResult<bool>;
    fn stop_by_event_id(&self, event_id: &str) -> EngineResult<bool>;
    fn stop_all(&self) -> EngineResult<bool>;

    // Low-level pattern playback
    fn play_dot(
        &self,
        request_id: i32,
        position: i32,
        duration_millis: i32,
        motors: &[i32],
    ) -> EngineResult<i32>;
    fn play_waveform(
        &self,
        request_id: i32,
        position: i32,
        motor_values: &[i32],
        play_times: &[i32],
        shape_values: &[i32],
    ) -> EngineResult<i32>;
    fn play_path(
        &self,
        request_id: i32,
        position: i32,
        xs: &[f32],
        ys: &[f32],
        intensities: &[i32],
    ) -> EngineResult<i32>;

    // Queries
    fn is_playing(&self) -> EngineResult<bool>;
    fn is_playing_by_request_id(&self, request_id: i32) -> EngineResult<bool>;
    fn is_playing_by_event_id(&self, event_id: &str) -> EngineResult<bool>;
    fn is_device_connected(&self, position: i32) -> EngineResult<bool>;
    fn ping(&self, address: &str) -> EngineResult<bool>;
    fn ping_all(&self) -> EngineResult<bool>;
    fn swap_position(&self, address: &str) -> EngineResult<bool>;

    // Data retrieval (UTF-8 JSON text; empty when the engine has nothing)
    fn device_info_json(&self) -> EngineResult<String>;
    fn mappings_json(&self) -> EngineResult<String>;
    fn event_time(&self, event_id: &str) -> EngineResult<i32>;
}
