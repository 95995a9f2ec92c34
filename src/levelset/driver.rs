//! Level set driver: iteration control for an interactive snake
//!
//! The driver owns the level set and its solver. Iterations run in
//! synchronous batches; between batches a caller-supplied callback sees the
//! current φ and may request more iterations, a stop, a restart or new
//! parameters. Requests take effect at the next batch boundary.
//!
//! States: Constructed → Initialized → Running ⇄ Paused → Converged,
//! and any state → Terminated.

use std::fmt;
use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::error::{Result, SnakeError};
use crate::levelset::parameters::SnakeParameters;
use crate::levelset::solver::Solver;
use crate::volume::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Constructed,
    Initialized,
    Running,
    Paused,
    Converged,
    Terminated,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Constructed => "Constructed",
            DriverState::Initialized => "Initialized",
            DriverState::Running => "Running",
            DriverState::Paused => "Paused",
            DriverState::Converged => "Converged",
            DriverState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// What to do with a solver-affecting parameter change while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigurePolicy {
    /// Refuse the change with a state misuse error
    Reject,
    /// Accept it and restart from the initial level set
    Restart,
}

/// Summary of one completed batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchReport {
    /// Iterations run in this batch
    pub iterations: usize,
    /// Iterations since the last (re)start
    pub total_iterations: usize,
    pub last_time_step: f64,
    pub max_change: f32,
    pub converged: bool,
}

/// Event delivered to the update callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateEvent {
    /// A batch finished
    Iteration(BatchReport),
    /// No iterations pending
    Idle,
}

/// Requests collected between batch boundaries
#[derive(Debug, Default)]
struct Requests {
    iterations: usize,
    end: bool,
    restart: bool,
    parameters: Option<(SnakeParameters, bool)>,
    restarted: bool,
}

/// View handed to the update callback between batches
pub struct UpdateContext<'a> {
    event: UpdateEvent,
    phi: &'a [f32],
    dims: [usize; 3],
    parameters: &'a SnakeParameters,
    requests: &'a mut Requests,
}

impl<'a> UpdateContext<'a> {
    pub fn event(&self) -> UpdateEvent {
        self.event
    }

    /// Current level set values, consistent at the batch boundary.
    pub fn phi(&self) -> &[f32] {
        self.phi
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Run `n` more iterations before the next idle tick.
    pub fn request_iterations(&mut self, n: usize) {
        self.requests.iterations = n;
    }

    /// Pause at this boundary.
    pub fn request_end_update(&mut self) {
        self.requests.end = true;
    }

    /// Rewind to the initial level set at this boundary and keep running.
    pub fn request_restart(&mut self) {
        self.requests.restart = true;
    }

    /// Queue new parameters for this boundary.
    ///
    /// Passive changes apply in place. A solver-affecting change is refused
    /// under `ReconfigurePolicy::Reject` and otherwise forces a restart.
    pub fn set_snake_parameters(&mut self, params: SnakeParameters, policy: ReconfigurePolicy) -> Result<()> {
        params.validate()?;
        let destructive = self.parameters.is_solver_affecting_change(&params);
        if destructive && policy == ReconfigurePolicy::Reject {
            return Err(SnakeError::state_misuse("change solver", DriverState::Running));
        }
        self.requests.parameters = Some((params, destructive));
        Ok(())
    }
}

pub struct LevelSetDriver {
    state: DriverState,
    batch_size: usize,
    initial: Option<Volume<f32>>,
    speed: Option<Volume<f32>>,
    parameters: SnakeParameters,
    solver: Option<Solver>,
    requests: Requests,
    last_report: Option<BatchReport>,
    diagnostic: Option<String>,
}

impl Default for LevelSetDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelSetDriver {
    /// Create a driver that reports after every iteration.
    pub fn new() -> Self {
        Self {
            state: DriverState::Constructed,
            batch_size: 1,
            initial: None,
            speed: None,
            parameters: SnakeParameters::default(),
            solver: None,
            requests: Requests::default(),
            last_report: None,
            diagnostic: None,
        }
    }

    /// Iterations per batch (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn parameters(&self) -> &SnakeParameters {
        &self.parameters
    }

    pub fn last_report(&self) -> Option<&BatchReport> {
        self.last_report.as_ref()
    }

    /// Message kept from the error that terminated the driver.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Iterations since the last (re)start.
    pub fn elapsed_iterations(&self) -> usize {
        self.solver.as_ref().map_or(0, |s| s.iterations())
    }

    pub fn dims(&self) -> Option<[usize; 3]> {
        self.initial.as_ref().map(|v| v.dims())
    }

    /// Copy of the current level set.
    pub fn snapshot(&self) -> Result<Volume<f32>> {
        match (&self.solver, &self.initial) {
            (Some(solver), Some(initial)) => {
                Volume::from_vec(solver.phi().to_vec(), initial.dims(), initial.spacing())
            }
            _ => Err(SnakeError::state_misuse("snapshot", self.state)),
        }
    }

    /// Current level set values without copying.
    pub fn phi(&self) -> Option<&[f32]> {
        self.solver.as_ref().map(|s| s.phi())
    }

    /// Supply the initial level set, speed and parameters, and create the solver.
    ///
    /// Nothing is allocated and the state is unchanged when validation fails.
    pub fn initialize(&mut self, phi0: Volume<f32>, speed: Volume<f32>, params: SnakeParameters) -> Result<()> {
        if self.state != DriverState::Constructed {
            return Err(SnakeError::state_misuse("initialize", self.state));
        }
        params.validate()?;
        phi0.check_same_grid(&speed)?;

        let solver = Solver::new(&phi0, &speed, &params)?;
        let dims = phi0.dims();
        info!(
            nx = dims[0],
            ny = dims[1],
            nz = dims[2],
            solver = ?params.solver,
            snake_type = ?params.snake_type,
            "Initialized level set driver"
        );

        self.initial = Some(phi0);
        self.speed = Some(speed);
        self.parameters = params;
        self.solver = Some(solver);
        self.requests = Requests::default();
        self.last_report = None;
        self.state = DriverState::Initialized;
        Ok(())
    }

    /// Queue iterations for the next `begin_update`.
    pub fn request_iterations(&mut self, n: usize) -> Result<()> {
        match self.state {
            DriverState::Initialized | DriverState::Paused => {
                self.requests.iterations = n;
                Ok(())
            }
            state => Err(SnakeError::state_misuse("request_iterations", state)),
        }
    }

    /// Accepted only while Paused, where it does nothing.
    ///
    /// A running update is stopped from its callback with
    /// `UpdateContext::request_end_update`.
    pub fn request_end_update(&mut self) -> Result<()> {
        match self.state {
            DriverState::Paused => Ok(()),
            state => Err(SnakeError::state_misuse("request_end_update", state)),
        }
    }

    /// Rewind to the initial level set; solver bookkeeping is rebuilt.
    pub fn request_restart(&mut self) -> Result<()> {
        match self.state {
            DriverState::Constructed | DriverState::Terminated => {
                Err(SnakeError::state_misuse("request_restart", self.state))
            }
            _ => {
                self.rebuild_solver()?;
                self.requests = Requests::default();
                self.last_report = None;
                self.state = DriverState::Initialized;
                info!("Level set restarted from initialization");
                Ok(())
            }
        }
    }

    /// Change parameters outside of an update.
    ///
    /// A new solver type rebuilds the solver from the initial level set and
    /// returns to Initialized; other changes apply in place, and a converged
    /// driver becomes Paused so it can continue.
    pub fn set_snake_parameters(&mut self, params: SnakeParameters) -> Result<()> {
        match self.state {
            DriverState::Terminated | DriverState::Running => {
                return Err(SnakeError::state_misuse("set_snake_parameters", self.state));
            }
            DriverState::Constructed => {
                params.validate()?;
                self.parameters = params;
                return Ok(());
            }
            _ => {}
        }

        params.validate()?;
        if self.parameters.is_solver_affecting_change(&params) {
            self.parameters = params;
            self.request_restart()
        } else {
            self.parameters = params;
            if let Some(solver) = self.solver.as_mut() {
                solver.set_parameters(&params);
            }
            if self.state == DriverState::Converged {
                self.state = DriverState::Paused;
            }
            debug!("Applied snake parameters in place");
            Ok(())
        }
    }

    /// Run `n` iterations without a callback, in batches.
    pub fn run(&mut self, n: usize) -> Result<DriverState> {
        match self.state {
            DriverState::Initialized | DriverState::Paused => {}
            state => return Err(SnakeError::state_misuse("run", state)),
        }
        self.state = DriverState::Running;

        let mut remaining = n;
        while remaining > 0 {
            let report = self.run_batch(remaining.min(self.batch_size))?;
            remaining -= report.iterations;
            if report.converged {
                self.state = DriverState::Converged;
                return Ok(self.state);
            }
        }
        self.state = DriverState::Paused;
        Ok(self.state)
    }

    /// Enter the update loop.
    ///
    /// The callback is invoked after every batch and on idle ticks when no
    /// iterations are pending. The loop leaves on `ControlFlow::Break`, on an
    /// end request (Paused), or on convergence (Converged). A numeric failure
    /// terminates the driver and is returned.
    pub fn begin_update<F>(&mut self, mut callback: F) -> Result<DriverState>
    where
        F: FnMut(&mut UpdateContext<'_>) -> ControlFlow<()>,
    {
        match self.state {
            DriverState::Initialized | DriverState::Paused => {}
            state => return Err(SnakeError::state_misuse("begin_update", state)),
        }
        self.state = DriverState::Running;
        self.requests.end = false;
        debug!(pending = self.requests.iterations, "Update loop started");

        loop {
            let event = if self.requests.iterations > 0 {
                let batch = self.requests.iterations.min(self.batch_size);
                let report = self.run_batch(batch)?;
                self.requests.iterations = self.requests.iterations.saturating_sub(report.iterations);
                if report.converged {
                    self.requests.iterations = 0;
                }
                UpdateEvent::Iteration(report)
            } else {
                UpdateEvent::Idle
            };

            let flow = {
                let (phi, dims) = match (&self.solver, &self.initial) {
                    (Some(solver), Some(initial)) => (solver.phi(), initial.dims()),
                    _ => return Err(SnakeError::state_misuse("begin_update", self.state)),
                };
                let mut context = UpdateContext {
                    event,
                    phi,
                    dims,
                    parameters: &self.parameters,
                    requests: &mut self.requests,
                };
                callback(&mut context)
            };

            self.apply_boundary_requests()?;

            if flow.is_break() || self.requests.end {
                self.requests.end = false;
                self.state = DriverState::Paused;
                break;
            }
            if let UpdateEvent::Iteration(report) = event {
                if report.converged && !self.requests.restarted {
                    self.state = DriverState::Converged;
                    break;
                }
            }
        }

        info!(state = %self.state, iterations = self.elapsed_iterations(), "Update loop finished");
        Ok(self.state)
    }

    /// Tear down the solver; every later operation is refused.
    pub fn terminate(&mut self) {
        self.solver = None;
        self.state = DriverState::Terminated;
        info!("Level set driver terminated");
    }

    fn rebuild_solver(&mut self) -> Result<()> {
        let (initial, speed) = match (&self.initial, &self.speed) {
            (Some(initial), Some(speed)) => (initial, speed),
            _ => return Err(SnakeError::state_misuse("restart", self.state)),
        };
        self.solver = Some(Solver::new(initial, speed, &self.parameters)?);
        Ok(())
    }

    fn apply_boundary_requests(&mut self) -> Result<()> {
        self.requests.restarted = false;
        if let Some((params, destructive)) = self.requests.parameters.take() {
            self.parameters = params;
            if destructive {
                self.requests.restart = true;
            } else if let Some(solver) = self.solver.as_mut() {
                solver.set_parameters(&params);
            }
        }
        if self.requests.restart {
            self.requests.restart = false;
            self.rebuild_solver()?;
            self.last_report = None;
            self.requests.restarted = true;
            info!("Level set restarted during update");
        }
        Ok(())
    }

    fn run_batch(&mut self, iterations: usize) -> Result<BatchReport> {
        let solver = match self.solver.as_mut() {
            Some(solver) => solver,
            None => return Err(SnakeError::state_misuse("iterate", self.state)),
        };

        let mut report = BatchReport {
            iterations: 0,
            total_iterations: solver.iterations(),
            last_time_step: 0.0,
            max_change: 0.0,
            converged: false,
        };

        for _ in 0..iterations {
            match solver.iterate() {
                Ok(it) => {
                    report.iterations += 1;
                    report.last_time_step = it.time_step;
                    report.max_change = report.max_change.max(it.max_change);
                    if it.converged {
                        report.converged = true;
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Level set diverged, terminating");
                    self.diagnostic = Some(err.to_string());
                    self.solver = None;
                    self.state = DriverState::Terminated;
                    return Err(err);
                }
            }
        }

        report.total_iterations = solver.iterations();
        debug!(
            iterations = report.iterations,
            total = report.total_iterations,
            dt = report.last_time_step,
            max_change = report.max_change,
            "Batch complete"
        );
        self.last_report = Some(report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levelset::parameters::SolverType;

    fn ball(n: usize, r: f64) -> Volume<f32> {
        let c = (n / 2) as f64;
        let mut phi = Volume::new([n, n, n], [1.0; 3], 1.0f32);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let d2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
                    if d2 <= r * r {
                        phi.set(i, j, k, -1.0);
                    }
                }
            }
        }
        phi
    }

    fn params(propagation: f64) -> SnakeParameters {
        SnakeParameters {
            curvature_weight: 0.0,
            propagation_weight: propagation,
            ..SnakeParameters::default_region()
        }
    }

    fn driver(propagation: f64) -> LevelSetDriver {
        let mut d = LevelSetDriver::new();
        let speed = Volume::new([12, 12, 12], [1.0; 3], 1.0f32);
        d.initialize(ball(12, 2.0), speed, params(propagation)).unwrap();
        d
    }

    #[test]
    fn test_state_transitions() {
        let mut d = LevelSetDriver::new();
        assert_eq!(d.state(), DriverState::Constructed);
        assert!(matches!(d.run(1), Err(SnakeError::StateMisuse { .. })));
        assert!(d.snapshot().is_err());

        let speed = Volume::new([12, 12, 12], [1.0; 3], 1.0f32);
        d.initialize(ball(12, 2.0), speed.clone(), params(1.0)).unwrap();
        assert_eq!(d.state(), DriverState::Initialized);
        assert!(d.initialize(ball(12, 2.0), speed, params(1.0)).is_err());

        assert_eq!(d.run(3).unwrap(), DriverState::Paused);
        assert_eq!(d.elapsed_iterations(), 3);
        assert_eq!(d.last_report().unwrap().total_iterations, 3);

        d.terminate();
        assert_eq!(d.state(), DriverState::Terminated);
        assert!(d.run(1).is_err());
        assert!(d.request_restart().is_err());
    }

    #[test]
    fn test_invalid_initialization_keeps_state() {
        let mut d = LevelSetDriver::new();
        let speed = Volume::new([12, 12, 11], [1.0; 3], 1.0f32);
        let err = d.initialize(ball(12, 2.0), speed, params(1.0)).unwrap_err();
        assert!(matches!(err, SnakeError::DimensionMismatch { .. }));
        assert_eq!(d.state(), DriverState::Constructed);

        let speed = Volume::new([12, 12, 12], [1.0; 3], 1.0f32);
        let bad = SnakeParameters { time_step_factor: 0.0, ..params(1.0) };
        assert!(matches!(d.initialize(ball(12, 2.0), speed, bad), Err(SnakeError::Configuration(_))));
        assert_eq!(d.state(), DriverState::Constructed);
    }

    #[test]
    fn test_update_loop_runs_requested_batches() {
        let mut d = driver(1.0).with_batch_size(2);
        d.request_iterations(5).unwrap();

        let mut batches = Vec::new();
        let state = d
            .begin_update(|ctx| match ctx.event() {
                UpdateEvent::Iteration(report) => {
                    assert_eq!(ctx.phi().len(), 12 * 12 * 12);
                    batches.push(report.iterations);
                    ControlFlow::Continue(())
                }
                UpdateEvent::Idle => ControlFlow::Break(()),
            })
            .unwrap();

        assert_eq!(state, DriverState::Paused);
        assert_eq!(batches, vec![2, 2, 1]);
        assert_eq!(d.elapsed_iterations(), 5);
    }

    #[test]
    fn test_callback_requests_more_and_ends() {
        let mut d = driver(1.0);
        let mut events = 0;
        let state = d
            .begin_update(|ctx| {
                events += 1;
                match ctx.event() {
                    UpdateEvent::Idle if events == 1 => ctx.request_iterations(3),
                    UpdateEvent::Iteration(r) if r.total_iterations == 3 => ctx.request_end_update(),
                    _ => {}
                }
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(state, DriverState::Paused);
        assert_eq!(events, 4);
        assert_eq!(d.elapsed_iterations(), 3);
    }

    #[test]
    fn test_restart_is_deterministic() {
        let mut d = driver(1.0);
        d.run(4).unwrap();
        let first = d.snapshot().unwrap();

        d.request_restart().unwrap();
        assert_eq!(d.state(), DriverState::Initialized);
        assert_eq!(d.elapsed_iterations(), 0);
        assert!(d.last_report().is_none());

        d.run(4).unwrap();
        assert_eq!(d.snapshot().unwrap(), first);
    }

    #[test]
    fn test_restart_inside_update_keeps_running() {
        let mut d = driver(1.0);
        d.request_iterations(4).unwrap();
        let mut restarted = false;
        let state = d
            .begin_update(|ctx| match ctx.event() {
                UpdateEvent::Iteration(r) if r.total_iterations == 2 && !restarted => {
                    restarted = true;
                    ctx.request_restart();
                    ControlFlow::Continue(())
                }
                UpdateEvent::Idle => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            })
            .unwrap();
        assert!(restarted);
        assert_eq!(state, DriverState::Paused);
        // Two iterations ran after the rewind
        assert_eq!(d.elapsed_iterations(), 2);
    }

    #[test]
    fn test_zero_speed_converges() {
        let mut d = driver(0.0);
        assert_eq!(d.run(10).unwrap(), DriverState::Converged);
        assert!(d.last_report().unwrap().converged);
        assert!(d.begin_update(|_| ControlFlow::Break(())).is_err());

        // A passive change lets the snake continue
        d.set_snake_parameters(params(1.0)).unwrap();
        assert_eq!(d.state(), DriverState::Paused);
        assert_eq!(d.run(2).unwrap(), DriverState::Paused);
    }

    #[test]
    fn test_end_update_outside_loop() {
        let mut d = LevelSetDriver::new();
        assert!(matches!(d.request_end_update(), Err(SnakeError::StateMisuse { .. })));

        let mut d = driver(1.0);
        assert!(matches!(d.request_end_update(), Err(SnakeError::StateMisuse { .. })));
        d.run(2).unwrap();
        assert_eq!(d.state(), DriverState::Paused);
        d.request_end_update().unwrap();
        assert_eq!(d.state(), DriverState::Paused);
        assert_eq!(d.elapsed_iterations(), 2);

        let mut d = driver(0.0);
        assert_eq!(d.run(5).unwrap(), DriverState::Converged);
        assert!(matches!(d.request_end_update(), Err(SnakeError::StateMisuse { .. })));

        d.terminate();
        assert!(matches!(d.request_end_update(), Err(SnakeError::StateMisuse { .. })));
    }

    #[test]
    fn test_solver_change_rebuilds() {
        let mut d = driver(1.0);
        d.run(3).unwrap();
        let dense = SnakeParameters { solver: SolverType::Dense, ..params(1.0) };
        d.set_snake_parameters(dense).unwrap();
        assert_eq!(d.state(), DriverState::Initialized);
        assert_eq!(d.elapsed_iterations(), 0);
        assert_eq!(d.parameters().solver, SolverType::Dense);
    }

    #[test]
    fn test_solver_change_in_loop_rejected() {
        let mut d = driver(1.0);
        d.request_iterations(1).unwrap();
        let mut outcome = None;
        d.begin_update(|ctx| {
            let legacy = SnakeParameters { solver: SolverType::Legacy, ..params(1.0) };
            outcome = Some(ctx.set_snake_parameters(legacy, ReconfigurePolicy::Reject));
            ControlFlow::Break(())
        })
        .unwrap();
        assert!(matches!(outcome, Some(Err(SnakeError::StateMisuse { .. }))));
        assert_eq!(d.parameters().solver, SolverType::SparseField);
    }

    #[test]
    fn test_divergence_terminates() {
        let mut d = LevelSetDriver::new();
        let speed = Volume::new([12, 12, 12], [1.0; 3], 1.0f32);
        let p = SnakeParameters {
            solver: SolverType::Legacy,
            time_step: 1.0e30,
            legacy_clamp: false,
            ..params(1.0)
        };
        d.initialize(ball(12, 2.0), speed, p).unwrap();

        let err = d.run(10).unwrap_err();
        assert!(matches!(err, SnakeError::NumericDivergence { .. }));
        assert_eq!(d.state(), DriverState::Terminated);
        assert!(d.diagnostic().is_some());
    }
}
