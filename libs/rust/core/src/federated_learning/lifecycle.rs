//! Controller run state machine.
//!
//! Phases:
//! - Idle
//! - Running (cycle 1..=N of one run)
//!
//! A second `begin` while running is refused with the id of the run in flight.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::model::RunId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running { run_id: RunId, cycle: u32, cycle_count: u32 },
}

#[derive(Debug)]
pub struct RunLifecycle {
    phase: RunPhase,
    phase_started_at: Instant,
    last_error: Option<String>,
    runs_finished: u64,
}

impl Default for RunLifecycle {
    fn default() -> Self { Self::new() }
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self { phase: RunPhase::Idle, phase_started_at: Instant::now(), last_error: None, runs_finished: 0 }
    }

    pub fn phase(&self) -> &RunPhase { &self.phase }

    pub fn current_run(&self) -> Option<RunId> {
        match self.phase {
            RunPhase::Running { run_id, .. } => Some(run_id),
            RunPhase::Idle => None,
        }
    }

    pub fn is_running(&self) -> bool { self.current_run().is_some() }

    pub fn begin(&mut self, run_id: RunId, cycle_count: u32) -> Result<(), RunId> {
        if let Some(current) = self.current_run() {
            return Err(current);
        }
        self.phase = RunPhase::Running { run_id, cycle: 0, cycle_count };
        self.phase_started_at = Instant::now();
        Ok(())
    }

    /// Records the cycle now executing. Ignored unless `run_id` is the active run.
    pub fn advance(&mut self, run_id: RunId, next: u32) {
        if let RunPhase::Running { run_id: active, cycle, .. } = &mut self.phase {
            if *active == run_id {
                *cycle = next;
            }
        }
    }

    pub fn finish(&mut self, run_id: RunId, error: Option<String>) {
        if self.current_run() != Some(run_id) {
            return;
        }
        self.phase = RunPhase::Idle;
        self.phase_started_at = Instant::now();
        self.runs_finished += 1;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }
    pub fn runs_finished(&self) -> u64 { self.runs_finished }
    pub fn in_phase_for(&self) -> Duration { self.phase_started_at.elapsed() }
}
