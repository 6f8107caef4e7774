//! fleetbench orchestrator - runs benchmark plans across a fleet.
//!
//! The layers, bottom up:
//! - [`transport`]: run a shell script on one host (ssh or local)
//! - [`executor`]: sync, polled and detached command execution
//! - [`runner`]: one host's ordered task list
//! - [`fanout`]: one step across many hosts, parallel or serial
//! - [`collector`]: artifact download with deterministic names
//! - [`driver`]: the whole plan, phase by phase

pub mod collector;
pub mod driver;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod lifecycle;
pub mod result;
pub mod retry;
pub mod runner;
pub mod transport;

pub use collector::{ArtifactName, Collector};
pub use driver::{
    Driver, DriverOptions, HostSummary, PlannedArtifact, PlannedCommand, PlannedHost, PlannedStep,
    Preflight, RunOutcome, RunReport,
};
pub use error::{CollectError, OrchestrationError, Result, TransportError};
pub use executor::{ExecRequest, Executor, ExecutorSettings, JobHandle, PollState};
pub use fanout::Coordinator;
pub use lifecycle::{DriverLifecycle, DriverState, RunPhase, Transition};
pub use result::{
    ArtifactRecord, ArtifactStatus, PollObservation, PollRecord, RunResult, StepReport, StepStatus,
    TaskStatus,
};
pub use retry::RetryPolicy;
pub use runner::{TaskDefaults, TaskRunner};
pub use transport::{CommandOutput, LocalTransport, SshTransport, Transport, TransportRouter};
