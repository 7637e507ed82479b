//! Sessions over Linux hardware performance counters: event source
//! discovery, counter configuration, and atomically controlled counter
//! groups with demultiplexed grouped reads.

mod discovery;
mod read_format;

#[cfg(target_os = "linux")]
mod event;
#[cfg(target_os = "linux")]
mod group;

pub use discovery::{
    enumerate_sources, enumerate_sources_in, DiscoveredSources, PmuSource, DEFAULT_SOURCE_CAP,
    EVENT_SOURCE_ROOT,
};

#[cfg(target_os = "linux")]
pub use event::{EventDescriptor, HardwareEvent};
#[cfg(target_os = "linux")]
pub use group::{Counter, GroupSession, Scope, SessionState};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot enumerate event sources under {}: {source}", path.display())]
    Discovery {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("cannot resolve type id for event source '{name}': {reason}")]
    TypeResolution { name: String, reason: String },
    #[error("event field '{field}' value {value:#x} does not fit in {width} bits")]
    InvalidEventConfig {
        field: &'static str,
        value: u64,
        width: u32,
    },
    #[error("failed to open counter '{label}': {source}")]
    Open {
        label: String,
        source: std::io::Error,
    },
    #[error("cannot {op} a session in state {state}")]
    InvalidSessionState { op: &'static str, state: &'static str },
    #[error("grouped read returned {got} counters, expected {expected}")]
    ShortRead { got: usize, expected: usize },
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
