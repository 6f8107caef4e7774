//! Driver lifecycle management.
//!
//! A run moves through a fixed sequence of states; every transition is
//! checked against [`DriverState::can_transition_to`] and recorded.

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error};

/// Benchmark phase the driver is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Server,
    Client,
}

/// Driver execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverState {
    /// Nothing has happened yet.
    Idle,
    /// Preflight and `prepare` steps.
    Preparing,
    /// `server` or `client` steps.
    Running(RunPhase),
    /// Pulling artifacts.
    Collecting,
    /// `teardown` steps and stopping detached jobs.
    TearingDown,
    /// Finished; see the report outcome for per-host results.
    Done,
    /// Aborted by a configuration error, critical step or interruption.
    Failed,
}

impl DriverState {
    /// Checks if the driver can move to `to`.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (Self::Idle, Self::Preparing) => true,
            // Preflight errors fail before anything ran; dry runs end here
            (Self::Preparing, Self::Failed | Self::Done) => true,
            (Self::Preparing, Self::Running(RunPhase::Server)) => true,
            (Self::Running(RunPhase::Server), Self::Running(RunPhase::Client)) => true,
            (Self::Running(RunPhase::Client), Self::Collecting) => true,
            // Aborts skip straight to teardown
            (Self::Preparing | Self::Running(_) | Self::Collecting, Self::TearingDown) => true,
            (Self::TearingDown, Self::Done | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preparing => write!(f, "preparing"),
            Self::Running(RunPhase::Server) => write!(f, "running(server)"),
            Self::Running(RunPhase::Client) => write!(f, "running(client)"),
            Self::Collecting => write!(f, "collecting"),
            Self::TearingDown => write!(f, "tearing-down"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: DriverState,
    pub at: DateTime<Utc>,
}

/// Tracks the driver's state and its history.
#[derive(Debug, Clone)]
pub struct DriverLifecycle {
    state: DriverState,
    history: Vec<Transition>,
}

impl DriverLifecycle {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
            history: vec![Transition {
                state: DriverState::Idle,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Moves to `to`, returning the previous state.
    pub fn transition(&mut self, to: DriverState) -> Result<DriverState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            error!(from = %from, to = %to, "Invalid state transition");
            return Err(OrchestrationError::InvalidTransition { from, to });
        }
        debug!(from = %from, to = %to, "State transition");
        self.state = to;
        self.history.push(Transition {
            state: to,
            at: Utc::now(),
        });
        Ok(from)
    }
}

impl Default for DriverLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
