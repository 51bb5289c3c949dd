//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the runtime:
//! - Fixed-capacity slot arenas for handle-addressed records
//! - Frame timing and pacing
//! - Logging utilities

pub mod arena;
pub mod time;
pub mod logging;
