//! # Core Runtime Module
//!
//! Shared configuration used by every subsystem.

pub mod config;

pub use config::{
    ArenaConfig,
    InputConfig,
    PresentConfig,
    RuntimeConfig,
    TimeConfig,
    MAX_FRAMES_IN_FLIGHT,
};
