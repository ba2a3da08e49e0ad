//! # relay-proto
//!
//! Shared types and traits for the Haptic Relay.
//!
//! This crate provides the wire-level abstractions used across all relay crates,
//! including:
//! - The quote-aware command line tokenizer
//! - The command descriptor table (name, arity, argument types)
//! - Typed argument values and locale-invariant parsing
//! - Reply and error shapes sent back to callers
//! - The `HapticEngine` trait every engine implementation provides

mod command;
mod command_line;
mod engine;
mod error;
mod reply;
mod value;

pub use command::{ArgKind, CommandDescriptor, CommandKind, COMMANDS, lookup};
pub use command_line::CommandLine;
pub use engine::{EngineError, EngineResult, HapticEngine, Spatial};
pub use error::DispatchError;
pub use reply::Reply;
pub use value::{
    ArgValue, parse_bool, parse_float, parse_float_array, parse_int, parse_int_array,
};
