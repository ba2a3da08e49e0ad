//! An in-process engine that records calls and returns scripted results.
//!
//! Used by the test suites and by `haptic-relay run --engine simulated` to
//! exercise the relay without the vendor library.

use std::sync::{Mutex, MutexGuard, PoisonError};

use relay_proto::{EngineError, EngineResult, HapticEngine, Spatial};
use tracing::debug;

/// One recorded facade call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    IsInstalled,
    IsRunning,
    Launch(bool),
    IsConnected,
    Close,
    RegisterCloud {
        api_key: String,
        workspace: String,
        init_data: String,
    },
    Reinit {
        api_key: String,
        workspace: String,
        json: String,
    },
    Play(String),
    PlayParam {
        event_id: String,
        request_id: i32,
        spatial: Spatial,
    },
    PlayWithStartTime {
        event_id: String,
        request_id: i32,
        start_millis: i32,
        spatial: Spatial,
    },
    PlayLoop {
        event_id: String,
        request_id: i32,
        spatial: Spatial,
        interval: i32,
        max_count: i32,
    },
    Pause(String),
    Resume(String),
    Stop(i32),
    StopByEventId(String),
    StopAll,
    PlayDot {
        request_id: i32,
        position: i32,
        duration_millis: i32,
        motors: Vec<i32>,
    },
    PlayWaveform {
        request_id: i32,
        position: i32,
        motor_values: Vec<i32>,
        play_times: Vec<i32>,
        shape_values: Vec<i32>,
    },
    PlayPath {
        request_id: i32,
        position: i32,
        xs: Vec<f32>,
        ys: Vec<f32>,
        intensities: Vec<i32>,
    },
    IsPlaying,
    IsPlayingByRequestId(i32),
    IsPlayingByEventId(String),
    IsDeviceConnected(i32),
    Ping(String),
    PingAll,
    SwapPosition(String),
    DeviceInfoJson,
    MappingsJson,
    EventTime(String),
}

impl EngineCall {
    /// True for calls that change playback or connection state.
    ///
    /// Probes (`is_running`, `is_connected`, ...) return false, so tests can
    /// ignore background polling.
    pub fn is_action(&self) -> bool {
        !matches!(
            self,
            EngineCall::IsInstalled
                | EngineCall::IsRunning
                | EngineCall::IsConnected
                | EngineCall::MappingsJson
        )
    }
}

#[derive(Debug)]
struct Script {
    installed: bool,
    running: bool,
    connected: bool,
    launch_starts_player: bool,
    register_succeeds: bool,
    reinit_succeeds: bool,
    connect_on_init: bool,
    mappings: String,
    device_info: String,
    bool_result: bool,
    pause_status: i32,
    event_time: i32,
    next_engine_id: i32,
    failure: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            installed: true,
            running: true,
            connected: true,
            launch_starts_player: true,
            register_succeeds: true,
            reinit_succeeds: true,
            connect_on_init: false,
            mappings: r#"[{"key":"HeartBeat"}]"#.to_string(),
            device_info: "[]".to_string(),
            bool_result: true,
            pause_status: 0,
            event_time: 1000,
            next_engine_id: 1,
            failure: None,
        }
    }
}

/// Scripted stand-in for the haptic engine.
///
/// The defaults describe a healthy engine: installed, running, connected,
/// registration succeeds, and mappings are available.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    script: Mutex<Script>,
    calls: Mutex<Vec<EngineCall>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose companion process is installed but stopped and
    /// disconnected. Launching starts it; registration connects it.
    pub fn stopped() -> Self {
        let engine = Self::new();
        {
            let mut script = engine.script();
            script.running = false;
            script.connected = false;
            script.connect_on_init = true;
        }
        engine
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: EngineCall) -> EngineResult<()> {
        debug!(?call, "Simulated engine call");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        match &self.script().failure {
            Some(message) => Err(EngineError::new(message.clone())),
            None => Ok(()),
        }
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded calls excluding background probes.
    pub fn actions(&self) -> Vec<EngineCall> {
        self.calls().into_iter().filter(EngineCall::is_action).collect()
    }

    pub fn set_installed(&self, installed: bool) {
        self.script().installed = installed;
    }

    pub fn set_running(&self, running: bool) {
        self.script().running = running;
    }

    pub fn set_connected(&self, connected: bool) {
        self.script().connected = connected;
    }

    pub fn set_launch_starts_player(&self, starts: bool) {
        self.script().launch_starts_player = starts;
    }

    pub fn set_register_succeeds(&self, succeeds: bool) {
        self.script().register_succeeds = succeeds;
    }

    pub fn set_reinit_succeeds(&self, succeeds: bool) {
        self.script().reinit_succeeds = succeeds;
    }

    /// When set, a successful registration or re-init brings the connection up.
    pub fn set_connect_on_init(&self, connect: bool) {
        self.script().connect_on_init = connect;
    }

    pub fn set_mappings(&self, mappings: impl Into<String>) {
        self.script().mappings = mappings.into();
    }

    /// Result returned by every boolean playback/query call.
    pub fn set_bool_result(&self, result: bool) {
        self.script().bool_result = result;
    }

    /// Makes every subsequent call fail with `message`, or clears the failure.
    pub fn fail_with(&self, message: Option<&str>) {
        self.script().failure = message.map(str::to_string);
    }

    fn bool_result(&self) -> bool {
        self.script().bool_result
    }
}

impl HapticEngine for SimulatedEngine {
    fn is_installed(&self) -> EngineResult<bool> {
        self.record(EngineCall::IsInstalled)?;
        Ok(self.script().installed)
    }

    fn is_running(&self) -> EngineResult<bool> {
        self.record(EngineCall::IsRunning)?;
        Ok(self.script().running)
    }

    fn launch(&self, try_launch: bool) -> EngineResult<bool> {
        self.record(EngineCall::Launch(try_launch))?;
        let mut script = self.script();
        if try_launch && script.launch_starts_player && script.installed {
            script.running = true;
        }
        Ok(script.installed)
    }

    fn is_connected(&self) -> EngineResult<bool> {
        self.record(EngineCall::IsConnected)?;
        Ok(self.script().connected)
    }

    fn close(&self) -> EngineResult<()> {
        self.record(EngineCall::Close)?;
        self.script().connected = false;
        Ok(())
    }

    fn register_cloud(
        &self,
        api_key: &str,
        workspace: &str,
        init_data: &str,
    ) -> EngineResult<bool> {
        self.record(EngineCall::RegisterCloud {
            api_key: api_key.to_string(),
            workspace: workspace.to_string(),
            init_data: init_data.to_string(),
        })?;
        let mut script = self.script();
        if script.register_succeeds && script.connect_on_init {
            script.connected = true;
        }
        Ok(script.register_succeeds)
    }

    fn reinit(&self, api_key: &str, workspace: &str, json: &str) -> EngineResult<bool> {
        self.record(EngineCall::Reinit {
            api_key: api_key.to_string(),
            workspace: workspace.to_string(),
            json: json.to_string(),
        })?;
        let mut script = self.script();
        if script.reinit_succeeds && script.connect_on_init {
            script.connected = true;
        }
        Ok(script.reinit_succeeds)
    }

    fn play(&self, event_id: &str) -> EngineResult<i32> {
        self.record(EngineCall::Play(event_id.to_string()))?;
        let mut script = self.script();
        let id = script.next_engine_id;
        script.next_engine_id += 1;
        Ok(id)
    }

    fn play_param(&self, event_id: &str, request_id: i32, spatial: Spatial) -> EngineResult<i32> {
        self.record(EngineCall::PlayParam {
            event_id: event_id.to_string(),
            request_id,
            spatial,
        })?;
        Ok(request_id)
    }

    fn play_with_start_time(
        &self,
        event_id: &str,
        request_id: i32,
        start_millis: i32,
        spatial: Spatial,
    ) -> EngineResult<()> {
        self.record(EngineCall::PlayWithStartTime {
            event_id: event_id.to_string(),
            request_id,
            start_millis,
            spatial,
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
        self.record(EngineCall::PlayLoop {
            event_id: event_id.to_string(),
            request_id,
            spatial,
            interval,
            max_count,
        })?;
        Ok(request_id)
    }

    fn pause(&self, event_id: &str) -> EngineResult<i32> {
        self.record(EngineCall::Pause(event_id.to_string()))?;
        Ok(self.script().pause_status)
    }

    fn resume(&self, event_id: &str) -> EngineResult<bool> {
        self.record(EngineCall::Resume(event_id.to_string()))?;
        Ok(self.bool_result())
    }

    fn stop(&self, request_id: i32) -> EngineResult<bool> {
        self.record(EngineCall::Stop(request_id))?;
        Ok(self.bool_result())
    }

    fn stop_by_event_id(&self, event_id: &str) -> EngineResult<bool> {
        self.record(EngineCall::StopByEventId(event_id.to_string()))?;
        Ok(self.bool_result())
    }

    fn stop_all(&self) -> EngineResult<bool> {
        self.record(EngineCall::StopAll)?;
        Ok(self.bool_result())
    }

    fn play_dot(
        &self,
        request_id: i32,
        position: i32,
        duration_millis: i32,
        motors: &[i32],
    ) -> EngineResult<i32> {
        self.record(EngineCall::PlayDot {
            request_id,
            position,
            duration_millis,
            motors: motors.to_vec(),
        })?;
        Ok(request_id)
    }

    fn play_waveform(
        &self,
        request_id: i32,
        position: i32,
        motor_values: &[i32],
        play_times: &[i32],
        shape_values: &[i32],
    ) -> EngineResult<i32> {
        self.record(EngineCall::PlayWaveform {
            request_id,
            position,
            motor_values: motor_values.to_vec(),
            play_times: play_times.to_vec(),
            shape_values: shape_values.to_vec(),
        })?;
        Ok(request_id)
    }

    fn play_path(
        &self,
        request_id: i32,
        position: i32,
        xs: &[f32],
        ys: &[f32],
        intensities: &[i32],
    ) -> EngineResult<i32> {
        self.record(EngineCall::PlayPath {
            request_id,
            position,
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            intensities: intensities.to_vec(),
        })?;
        Ok(request_id)
    }

    fn is_playing(&self) -> EngineResult<bool> {
        self.record(EngineCall::IsPlaying)?;
        Ok(self.bool_result())
    }

    fn is_playing_by_request_id(&self, request_id: i32) -> EngineResult<bool> {
        self.record(EngineCall::IsPlayingByRequestId(request_id))?;
        Ok(self.bool_result())
    }

    fn is_playing_by_event_id(&self, event_id: &str) -> EngineResult<bool> {
        self.record(EngineCall::IsPlayingByEventId(event_id.to_string()))?;
        Ok(self.bool_result())
    }

    fn is_device_connected(&self, position: i32) -> EngineResult<bool> {
        self.record(EngineCall::IsDeviceConnected(position))?;
        Ok(self.bool_result())
    }

    fn ping(&self, address: &str) -> EngineResult<bool> {
        self.record(EngineCall::Ping(address.to_string()))?;
        Ok(self.bool_result())
    }

    fn ping_all(&self) -> EngineResult<bool> {
        self.record(EngineCall::PingAll)?;
        Ok(self.bool_result())
    }

    fn swap_position(&self, address: &str) -> EngineResult<bool> {
        self.record(EngineCall::SwapPosition(address.to_string()))?;
        Ok(self.bool_result())
    }

    fn device_info_json(&self) -> EngineResult<String> {
        self.record(EngineCall::DeviceInfoJson)?;
        Ok(self.script().device_info.clone())
    }

    fn mappings_json(&self) -> EngineResult<String> {
        self.record(EngineCall::MappingsJson)?;
        Ok(self.script().mappings.clone())
    }

    fn event_time(&self, event_id: &str) -> EngineResult<i32> {
        self.record(EngineCall::EventTime(event_id.to_string()))?;
        Ok(self.script().event_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_starts_stopped_player() {
        let engine = SimulatedEngine::stopped();
        assert!(!engine.is_running().unwrap());
        assert!(engine.launch(true).unwrap());
        assert!(engine.is_running().unwrap());
    }

    #[test]
    fn test_registration_connects_when_scripted() {
        let engine = SimulatedEngine::stopped();
        assert!(!engine.is_connected().unwrap());
        assert!(engine.register_cloud("key", "app", "").unwrap());
        assert!(engine.is_connected().unwrap());
    }

    #[test]
    fn test_failure_is_reported_and_recorded() {
        let engine = SimulatedEngine::new();
        engine.fail_with(Some("device busy"));
        let err = engine.stop(3).unwrap_err();
        assert_eq!(err.message(), "device busy");
        assert_eq!(engine.calls(), vec![EngineCall::Stop(3)]);
    }

    #[test]
    fn test_actions_skip_probes() {
        let engine = SimulatedEngine::new();
        engine.is_running().unwrap();
        engine.is_connected().unwrap();
        engine.stop_all().unwrap();
        assert_eq!(engine.actions(), vec![EngineCall::StopAll]);
    }
}
