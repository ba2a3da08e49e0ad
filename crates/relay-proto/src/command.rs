//! The command descriptor table.
//!
//! External callers (log producers, socket clients) depend on this table
//! verbatim: the command name, its minimum argument count, and the type of
//! each positional argument.

/// Declared type of one positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Str,
    Int,
    Float,
    Bool,
    IntArray,
    FloatArray,
}

/// Every engine operation the relay can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    PlayParam,
    PlayWithStartTime,
    PlayDot,
    PlayWaveform,
    PlayPath,
    PlayLoop,
    Pause,
    Resume,
    Stop,
    StopByEventId,
    StopAll,
    IsPlaying,
    IsPlayingByRequestId,
    IsPlayingByEventId,
    IsDeviceConnected,
    Ping,
    PingAll,
    SwapPosition,
    DeviceInfoJson,
    MappingsJson,
    IsPlayerInstalled,
    IsPlayerRunning,
    LaunchPlayer,
    EventTime,
}

/// Static description of one dispatchable command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Wire name (matched case-insensitively).
    pub name: &'static str,
    /// Engine operation to invoke.
    pub kind: CommandKind,
    /// Argument types, in positional order. The length is the minimum arity.
    pub args: &'static [ArgKind],
}

impl CommandDescriptor {
    /// Minimum number of arguments after the command name.
    pub fn min_args(&self) -> usize {
        self.args.len()
    }
}

use ArgKind::{Bool, Float, FloatArray, Int, IntArray, Str};

const fn cmd(
    name: &'static str,
    kind: CommandKind,
    args: &'static [ArgKind],
) -> CommandDescriptor {
    CommandDescriptor { name, kind, args }
}

/// All dispatchable commands. Each name appears exactly once.
pub const COMMANDS: &[CommandDescriptor] = &[
    cmd("play", CommandKind::Play, &[Str]),
    // eventId, reqId, intensity, duration, angleX, offsetY
    cmd(
        "playParam",
        CommandKind::PlayParam,
        &[Str, Int, Float, Float, Float, Float],
    ),
    // eventId, reqId, startMillis, intensity, duration, angleX, offsetY
    cmd(
        "playWithStartTime",
        CommandKind::PlayWithStartTime,
        &[Str, Int, Int, Float, Float, Float, Float],
    ),
    // position, durationMs, motors
    cmd("playDot", CommandKind::PlayDot, &[Int, Int, IntArray]),
    // reqId, position, motorVals, playTimes, shapeVals
    cmd(
        "playWaveform",
        CommandKind::PlayWaveform,
        &[Int, Int, IntArray, IntArray, IntArray],
    ),
    // position, xs, ys, intensities
    cmd(
        "playPath",
        CommandKind::PlayPath,
        &[Int, FloatArray, FloatArray, IntArray],
    ),
    // eventId, intensity, duration, angleX, offsetY, interval, maxCount
    cmd(
        "playLoop",
        CommandKind::PlayLoop,
        &[Str, Float, Float, Float, Float, Int, Int],
    ),
    cmd("pause", CommandKind::Pause, &[Str]),
    cmd("resume", CommandKind::Resume, &[Str]),
    cmd("stop", CommandKind::Stop, &[Int]),
    cmd("stopByEventId", CommandKind::StopByEventId, &[Str]),
    cmd("stopAll", CommandKind::StopAll, &[]),
    cmd("isPlaying", CommandKind::IsPlaying, &[]),
    cmd("isPlayingByRequestId", CommandKind::IsPlayingByRequestId, &[Int]),
    cmd("isPlayingByEventId", CommandKind::IsPlayingByEventId, &[Str]),
    cmd("isbHapticsConnected", CommandKind::IsDeviceConnected, &[Int]),
    cmd("ping", CommandKind::Ping, &[Str]),
    cmd("pingAll", CommandKind::PingAll, &[]),
    cmd("swapPosition", CommandKind::SwapPosition, &[Str]),
    cmd("getDeviceInfoJson", CommandKind::DeviceInfoJson, &[]),
    cmd("getHapticMappingsJson", CommandKind::MappingsJson, &[]),
    // Legacy alias kept for older log producers.
    cmd("bHapticsGetHapticMappings", CommandKind::MappingsJson, &[]),
    cmd("isPlayerInstalled", CommandKind::IsPlayerInstalled, &[]),
    cmd("isPlayerRunning", CommandKind::IsPlayerRunning, &[]),
    cmd("launchPlayer", CommandKind::LaunchPlayer, &[Bool]),
    cmd("getEventTime", CommandKind::EventTime, &[Str]),
];

/// Finds the descriptor for a command name, ignoring ASCII case.
pub fn lookup(name: &str) -> Option<&'static CommandDescriptor> {
    COMMANDS
        .iter()
        .find(|descriptor| descriptor.name.eq_ignore_ascii_case(name))
}
