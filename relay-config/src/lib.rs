//! Relay Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It serves as the shared configuration vocabulary across all Relay crates.

use serde::Deserialize;

/// Top-level kernel configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Execution limits
    pub limits: LimitConfig,
    /// Identifier allocation
    pub ids: IdConfig,
}

/// Configuration for execution limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum number of parked continuations per task
    pub max_call_depth: usize,
    /// Maximum number of ready-queue steps run by a single pump
    pub max_pump_steps: usize,
}

/// First identifier handed out for each kind of token
///
/// Counters only ever grow, so tokens are never reused within a process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    pub object_base: u64,
    pub callback_base: u64,
    pub promise_base: u64,
}

/// Kernel component, used to derive log targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Registry,
    Objects,
    Router,
    Coordinator,
    Dispatcher,
}

impl Phase {
    /// All phases, in data-flow order
    pub const ALL: [Phase; 5] = [
        Phase::Dispatcher,
        Phase::Registry,
        Phase::Objects,
        Phase::Router,
        Phase::Coordinator,
    ];

    /// Get the string name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Registry => "registry",
            Phase::Objects => "objects",
            Phase::Router => "router",
            Phase::Coordinator => "coordinator",
            Phase::Dispatcher => "dispatcher",
        }
    }

    /// Get the log target name for this phase
    pub fn target(&self) -> String {
        format!("relay::{}", self.as_str())
    }

    /// Parse a phase from its string name
    pub fn from_name(name: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            max_pump_steps: 10_000,
        }
    }
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            object_base: 10_000,
            callback_base: 20_000,
            promise_base: 30_000,
        }
    }
}
