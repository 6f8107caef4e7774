//! Status colors for CLI output.
//!
//! The same palette is used for `colored` text and `comfy-table` cells:
//!
//! - Success: Green (#10B981)
//! - Warning: Yellow (#F59E0B)
//! - Error: Red (#EF4444)
//! - Muted: Gray (#9CA3AF)

use colored::Color;
use comfy_table::Color as TableColor;
use fleetbench_orchestrator::{ArtifactStatus, RunOutcome, StepStatus, TaskStatus};

pub const SUCCESS_RGB: (u8, u8, u8) = (16, 185, 129);
pub const WARNING_RGB: (u8, u8, u8) = (245, 158, 11);
pub const ERROR_RGB: (u8, u8, u8) = (239, 68, 68);
pub const MUTED_RGB: (u8, u8, u8) = (156, 163, 175);

/// Severity bucket shared by every status type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Error,
    Muted,
}

impl Tone {
    const fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Success => SUCCESS_RGB,
            Self::Warning => WARNING_RGB,
            Self::Error => ERROR_RGB,
            Self::Muted => MUTED_RGB,
        }
    }

    pub fn text(self) -> Color {
        let (r, g, b) = self.rgb();
        Color::TrueColor { r, g, b }
    }

    pub fn cell(self) -> TableColor {
        let (r, g, b) = self.rgb();
        TableColor::Rgb { r, g, b }
    }
}

pub fn task_tone(status: TaskStatus) -> Tone {
    match status {
        TaskStatus::Ok => Tone::Success,
        TaskStatus::Skipped => Tone::Muted,
        TaskStatus::Unreachable | TaskStatus::TimedOut => Tone::Warning,
        TaskStatus::Failed | TaskStatus::Abandoned => Tone::Error,
    }
}

pub fn step_tone(status: StepStatus) -> Tone {
    match status {
        StepStatus::Ok => Tone::Success,
        StepStatus::Failed => Tone::Error,
        StepStatus::NotRun => Tone::Muted,
    }
}

pub fn artifact_tone(status: ArtifactStatus) -> Tone {
    match status {
        ArtifactStatus::Collected => Tone::Success,
        ArtifactStatus::Missing | ArtifactStatus::Unreachable => Tone::Warning,
        ArtifactStatus::Failed => Tone::Error,
    }
}

pub fn outcome_tone(outcome: RunOutcome) -> Tone {
    match outcome {
        RunOutcome::Success => Tone::Success,
        RunOutcome::Partial | RunOutcome::Unreachable => Tone::Warning,
        RunOutcome::CriticalFailure | RunOutcome::Interrupted => Tone::Error,
    }
}
