//! Command dispatcher.
//!
//! Turns one comma-delimited command line into a typed engine call and a
//! reply. Every failure becomes an `ERR:<code>` reply; nothing escapes to
//! the ingestion task that delivered the line.

use std::sync::Arc;

use relay_proto::{
    ArgValue, CommandDescriptor, CommandKind, CommandLine, DispatchError, HapticEngine, Reply,
    Spatial, lookup,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client_registry::Outbound;
use crate::request_id::RequestIdAllocator;

/// Destination for the reply to one command line.
pub trait ReplySink: Send + Sync {
    fn send_reply(&self, reply: String);
}

impl ReplySink for mpsc::UnboundedSender<String> {
    fn send_reply(&self, reply: String) {
        if self.send(reply).is_err() {
            debug!("Reply dropped, receiver closed");
        }
    }
}

impl ReplySink for mpsc::UnboundedSender<Outbound> {
    fn send_reply(&self, reply: String) {
        if self.send(Outbound::Text(reply)).is_err() {
            debug!("Reply dropped, connection closed");
        }
    }
}

/// Shared by every ingestion source; cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn HapticEngine>,
    ids: Arc<RequestIdAllocator>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn HapticEngine>, ids: Arc<RequestIdAllocator>) -> Self {
        Self { engine, ids }
    }

    pub fn engine(&self) -> &Arc<dyn HapticEngine> {
        &self.engine
    }

    pub fn ids(&self) -> &Arc<RequestIdAllocator> {
        &self.ids
    }

    /// Dispatches `line` and sends the reply, if any, to `reply`.
    ///
    /// A blank line produces no reply.
    pub fn dispatch(&self, line: &str, reply: Option<&dyn ReplySink>) {
        if let Some(result) = self.handle(line) {
            if let Some(sink) = reply {
                sink.send_reply(result.to_wire());
            }
        }
    }

    /// Dispatches `line` and returns its reply. `None` for a blank line.
    pub fn handle(&self, line: &str) -> Option<Reply> {
        let command = CommandLine::parse(line);
        let name = command.name()?;

        let Some(descriptor) = lookup(name) else {
            warn!(command = %name, line, "Unknown command");
            return Some(Reply::Error(DispatchError::UnknownCommand));
        };

        let reply = match self.run(descriptor, command.args()) {
            Ok(reply) => {
                debug!(command = descriptor.name, result = %reply, "Engine call succeeded");
                reply
            }
            Err(err @ DispatchError::Engine(_)) => {
                error!(command = descriptor.name, error = %err, "Engine call failed");
                Reply::Error(err)
            }
            Err(err) => {
                warn!(command = descriptor.name, line, error = %err, "Rejected command parameters");
                Reply::Error(err)
            }
        };

        info!(command = descriptor.name, ok = !reply.is_error(), reply = %reply, "Processed command");
        Some(reply)
    }

    fn run(&self, descriptor: &CommandDescriptor, tokens: &[String]) -> Result<Reply, DispatchError> {
        if tokens.len() < descriptor.min_args() {
            return Err(DispatchError::InvalidParams);
        }
        let values = descriptor
            .args
            .iter()
            .zip(tokens)
            .map(|(kind, token)| ArgValue::parse(*kind, token))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute(descriptor.kind, &Args(values))
    }

    fn execute(&self, kind: CommandKind, args: &Args) -> Result<Reply, DispatchError> {
        let engine = self.engine.as_ref();
        let reply = match kind {
            CommandKind::Play => Reply::Int(engine.play(args.str(0)?)?),
            CommandKind::PlayParam => {
                let request_id = self.ids.resolve(args.int(1)?);
                Reply::Int(engine.play_param(args.str(0)?, request_id, args.spatial(2)?)?)
            }
            CommandKind::PlayWithStartTime => {
                let request_id = self.ids.resolve(args.int(1)?);
                engine.play_with_start_time(
                    args.str(0)?,
                    request_id,
                    args.int(2)?,
                    args.spatial(3)?,
                )?;
                Reply::RelayRequestId(request_id)
            }
            CommandKind::PlayDot => {
                let request_id = self.ids.next_id();
                Reply::Int(engine.play_dot(request_id, args.int(0)?, args.int(1)?, args.ints(2)?)?)
            }
            CommandKind::PlayWaveform => {
                let (motors, times, shapes) = (args.ints(2)?, args.ints(3)?, args.ints(4)?);
                if motors.is_empty() || times.len() != motors.len() || shapes.len() != motors.len()
                {
                    return Err(DispatchError::LengthMismatch);
                }
                let request_id = self.ids.resolve(args.int(0)?);
                Reply::Int(engine.play_waveform(request_id, args.int(1)?, motors, times, shapes)?)
            }
            CommandKind::PlayPath => {
                let (xs, ys, intensities) = (args.floats(1)?, args.floats(2)?, args.ints(3)?);
                if ys.len() != xs.len() || intensities.len() != xs.len() {
                    return Err(DispatchError::LengthMismatch);
                }
                let request_id = self.ids.next_id();
                Reply::Int(engine.play_path(request_id, args.int(0)?, xs, ys, intensities)?)
            }
            CommandKind::PlayLoop => {
                let request_id = self.ids.next_id();
                Reply::Int(engine.play_loop(
                    args.str(0)?,
                    request_id,
                    args.spatial(1)?,
                    args.int(5)?,
                    args.int(6)?,
                )?)
            }
            CommandKind::Pause => Reply::Int(engine.pause(args.str(0)?)?),
            CommandKind::Resume => Reply::Bool(engine.resume(args.str(0)?)?),
            CommandKind::Stop => {
                engine.stop(args.int(0)?)?;
                Reply::Ok
            }
            CommandKind::StopByEventId => Reply::Bool(engine.stop_by_event_id(args.str(0)?)?),
            CommandKind::StopAll => {
                engine.stop_all()?;
                Reply::Ok
            }
            CommandKind::IsPlaying => Reply::Bool(engine.is_playing()?),
            CommandKind::IsPlayingByRequestId => {
                Reply::Bool(engine.is_playing_by_request_id(args.int(0)?)?)
            }
            CommandKind::IsPlayingByEventId => {
                Reply::Bool(engine.is_playing_by_event_id(args.str(0)?)?)
            }
            CommandKind::IsDeviceConnected => Reply::Bool(engine.is_device_connected(args.int(0)?)?),
            CommandKind::Ping => Reply::Bool(engine.ping(args.str(0)?)?),
            CommandKind::PingAll => Reply::Bool(engine.ping_all()?),
            CommandKind::SwapPosition => Reply::Bool(engine.swap_position(args.str(0)?)?),
            CommandKind::DeviceInfoJson => Reply::Text(engine.device_info_json()?),
            CommandKind::MappingsJson => Reply::Text(engine.mappings_json()?),
            CommandKind::IsPlayerInstalled => Reply::Bool(engine.is_installed()?),
            CommandKind::IsPlayerRunning => Reply::Bool(engine.is_running()?),
            CommandKind::LaunchPlayer => Reply::Bool(engine.launch(args.bool(0)?)?),
            CommandKind::EventTime => Reply::Int(engine.event_time(args.str(0)?)?),
        };
        Ok(reply)
    }
}

/// Converted arguments, positionally typed by the command descriptor.
struct Args(Vec<ArgValue>);

impl Args {
    fn get(&self, index: usize) -> Result<&ArgValue, DispatchError> {
        self.0.get(index).ok_or(DispatchError::InvalidParams)
    }

    fn str(&self, index: usize) -> Result<&str, DispatchError> {
        match self.get(index)? {
            ArgValue::Str(value) => Ok(value),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    fn int(&self, index: usize) -> Result<i32, DispatchError> {
        match self.get(index)? {
            ArgValue::Int(value) => Ok(*value),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    fn float(&self, index: usize) -> Result<f32, DispatchError> {
        match self.get(index)? {
            ArgValue::Float(value) => Ok(*value),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    fn bool(&self, index: usize) -> Result<bool, DispatchError> {
        match self.get(index)? {
            ArgValue::Bool(value) => Ok(*value),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    fn ints(&self, index: usize) -> Result<&[i32], DispatchError> {
        match self.get(index)? {
            ArgValue::IntArray(values) => Ok(values),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    fn floats(&self, index: usize) -> Result<&[f32], DispatchError> {
        match self.get(index)? {
            ArgValue::FloatArray(values) => Ok(values),
            _ => Err(DispatchError::InvalidParams),
        }
    }

    /// Four consecutive floats: intensity, duration, angleX, offsetY.
    fn spatial(&self, start: usize) -> Result<Spatial, DispatchError> {
        Ok(Spatial {
            intensity: self.float(start)?,
            duration: self.float(start + 1)?,
            angle_x: self.float(start + 2)?,
            offset_y: self.float(start + 3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, SimulatedEngine};
    use relay_proto::COMMANDS;

    fn dispatcher() -> (Dispatcher, Arc<SimulatedEngine>) {
        let engine = Arc::new(SimulatedEngine::new());
        let dispatcher = Dispatcher::new(engine.clone(), Arc::new(RequestIdAllocator::new()));
        (dispatcher, engine)
    }

    fn wire(dispatcher: &Dispatcher, line: &str) -> String {
        dispatcher
            .handle(line)
            .map(|reply| reply.to_wire())
            .unwrap_or_else(|| panic!("no reply for {line:?}"))
    }

    #[test]
    fn test_play_replies_with_engine_id() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "play,HeartBeat"), "1");
        assert_eq!(wire(&dispatcher, "PLAY,Explosion"), "2");
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Play("HeartBeat".into()),
                EngineCall::Play("Explosion".into())
            ]
        );
    }

    #[test]
    fn test_short_lines_never_reach_engine() {
        let (dispatcher, engine) = dispatcher();
        for descriptor in COMMANDS.iter().filter(|d| d.min_args() > 0) {
            let mut line = descriptor.name.to_string();
            for _ in 1..descriptor.min_args() {
                line.push_str(",1");
            }
            assert_eq!(wire(&dispatcher, &line), "ERR:invalid_params", "{line}");
        }
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_blank_line_has_no_reply() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(dispatcher.handle(""), None);
        assert_eq!(dispatcher.handle("   "), None);
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let (dispatcher, _) = dispatcher();
        assert_eq!(wire(&dispatcher, "explode,now"), "ERR:unknown_command");
    }

    #[test]
    fn test_play_dot_decodes_motor_array() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "playDot,0,100,0;1;5;7"), "1");
        assert_eq!(
            engine.calls(),
            vec![EngineCall::PlayDot {
                request_id: 1,
                position: 0,
                duration_millis: 100,
                motors: vec![0, 1, 5, 7],
            }]
        );
    }

    #[test]
    fn test_play_dot_bad_element() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "playDot,0,100,0;x;5"), "ERR:bad_number");
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_waveform_length_mismatch() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(
            wire(&dispatcher, "playWaveform,0,0,10;20;30,100;100,1;1;1"),
            "ERR:length_mismatch"
        );
        assert_eq!(
            wire(&dispatcher, "playWaveform,0,0,,,"),
            "ERR:length_mismatch"
        );
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_waveform_keeps_caller_id() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "playWaveform,77,2,10|20,100|200,1|2"), "77");
        assert!(matches!(
            engine.calls().as_slice(),
            [EngineCall::PlayWaveform { request_id: 77, position: 2, .. }]
        ));
    }

    #[test]
    fn test_path_length_mismatch() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(
            wire(&dispatcher, "playPath,0,0.1;0.2,0.5,100;100"),
            "ERR:length_mismatch"
        );
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_stop_replies_ok() {
        let (dispatcher, engine) = dispatcher();
        engine.set_bool_result(false);
        assert_eq!(wire(&dispatcher, "stop,1234"), "OK");
        assert_eq!(engine.calls(), vec![EngineCall::Stop(1234)]);
    }

    #[test]
    fn test_boolean_replies_are_consistent() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "ping,AA:BB:CC:DD:EE:FF"), "True");
        assert_eq!(wire(&dispatcher, "isPlaying"), "True");
        engine.set_bool_result(false);
        assert_eq!(wire(&dispatcher, "pingAll"), "False");
        assert_eq!(wire(&dispatcher, "isbHapticsConnected,3"), "False");
    }

    #[test]
    fn test_play_param_allocates_id_for_zero() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "playParam,Bump,0,0.8,1.2,45,10"), "1");
        assert_eq!(
            engine.calls(),
            vec![EngineCall::PlayParam {
                event_id: "Bump".into(),
                request_id: 1,
                spatial: Spatial {
                    intensity: 0.8,
                    duration: 1.2,
                    angle_x: 45.0,
                    offset_y: 10.0,
                },
            }]
        );
    }

    #[test]
    fn test_play_with_start_time_returns_request_id() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(
            dispatcher.handle("playWithStartTime,Bump,0,250,1,1,0,0"),
            Some(Reply::RelayRequestId(1))
        );
        assert_eq!(wire(&dispatcher, "playWithStartTime,Bump,42,250,1,1,0,0"), "42");
        assert_eq!(engine.calls().len(), 2);
    }

    #[test]
    fn test_launch_player_flag() {
        let (dispatcher, engine) = dispatcher();
        assert_eq!(wire(&dispatcher, "launchPlayer,true"), "True");
        assert_eq!(wire(&dispatcher, "launchPlayer,0"), "True");
        assert_eq!(wire(&dispatcher, "launchPlayer,perhaps"), "ERR:bad_bool");
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Launch(true), EngineCall::Launch(false)]
        );
    }

    #[test]
    fn test_engine_failure_becomes_error_reply() {
        let (dispatcher, engine) = dispatcher();
        engine.fail_with(Some("device busy"));
        assert_eq!(wire(&dispatcher, "play,HeartBeat"), "ERR:device busy");
        engine.fail_with(None);
        assert_eq!(wire(&dispatcher, "play,HeartBeat"), "1");
    }

    #[test]
    fn test_mappings_alias_returns_json() {
        let (dispatcher, _) = dispatcher();
        assert_eq!(
            wire(&dispatcher, "bHapticsGetHapticMappings"),
            r#"[{"key":"HeartBeat"}]"#
        );
    }

    #[tokio::test]
    async fn test_dispatch_sends_reply_to_sink() {
        let (dispatcher, _) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        dispatcher.dispatch("stopAll", Some(&tx));
        dispatcher.dispatch("", Some(&tx));
        dispatcher.dispatch("getEventTime,HeartBeat", Some(&tx));
        assert_eq!(rx.recv().await.as_deref(), Some("OK"));
        assert_eq!(rx.recv().await.as_deref(), Some("1000"));
    }
}
