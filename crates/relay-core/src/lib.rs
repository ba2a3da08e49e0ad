//! # relay-core
//!
//! Core relay functionality for Haptic Relay.
//!
//! This crate provides:
//! - The command dispatcher that turns command lines into engine calls
//! - The log tailer and WebSocket ingestion sources
//! - The startup orchestrator that brings the engine online
//! - The status monitor, request-id allocator, and client registry
//! - Configuration loading and logging setup

mod client_registry;
mod config;
mod dispatcher;
pub mod engine;
pub mod logging;
mod request_id;
pub mod startup;
pub mod status;
pub mod tail;
pub mod ws_server;

pub use client_registry::{ClientId, ClientRegistry, ClientSender, Outbound};
pub use config::{
    ConfigError, EngineConfig, IngestMode, LoggingConfig, OfflineConfig, RelayConfig,
    SettingsConfig, StatusSettings, TailSettings, TimeoutsConfig,
};
pub use dispatcher::{Dispatcher, ReplySink};
pub use logging::{LoggingGuard, init_logging};
pub use request_id::RequestIdAllocator;
pub use startup::{
    Ingestion, Orchestrator, StartupOutcome, StartupSettings, StartupState, StartupTimeouts,
};
pub use status::{ConnectionStatus, StatusMonitor, StatusSnapshot};
pub use tail::{TagMatcher, TailCursor, TailError, TailHandle, TailOptions, spawn_tailer};
pub use ws_server::{ServerError, ServerHandle, ServerOptions, listen, start_server};
