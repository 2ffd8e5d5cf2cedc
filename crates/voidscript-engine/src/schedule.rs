//! System registration, ordering and the per-system harness.
//!
//! Systems are named closures over [`Commands`]. Ordering constraints
//! (`after`) are resolved whenever a system is added, never per frame: the
//! execution order is a stable topological sort where systems without a
//! constraint between them keep their registration order. A constraint may
//! name a system that is registered later; one that never shows up is
//! ignored.

use std::time::{Duration, Instant};

use tracing::{debug, error, trace};
use voidscript_ecs::commands::Commands;
use voidscript_ecs::world::World;

use crate::ScheduleError;

/// Body of a [`System`]. An `Err` is recorded as a [`SystemFailure`].
pub type SystemFn = Box<dyn FnMut(&mut Commands<'_>) -> anyhow::Result<()>>;
/// Predicate checked before each run of a [`System`].
pub type ConditionFn = Box<dyn Fn(&World) -> bool>;

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A named unit of per-frame work.
///
/// ```
/// use voidscript_engine::prelude::*;
///
/// struct Paused(bool);
///
/// let system = System::new("physics", |_cmds: &mut Commands| Ok(()))
///     .after("input")
///     .run_if(|world: &World| !world.resource::<Paused>().is_some_and(|p| p.0));
/// assert_eq!(system.name(), "physics");
/// ```
pub struct System {
    name: String,
    func: SystemFn,
    after: Vec<String>,
    condition: Option<ConditionFn>,
}

impl System {
    pub fn new(
        name: impl Into<String>,
        func: impl FnMut(&mut Commands<'_>) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
            after: Vec::new(),
            condition: None,
        }
    }

    /// Run after the system called `name`.
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    /// Only run in frames where `condition` holds. The condition is checked
    /// once, before the system's turn.
    pub fn run_if(mut self, condition: impl Fn(&World) -> bool + 'static) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names passed to [`after`](Self::after), in call order.
    pub fn dependencies(&self) -> &[String] {
        &self.after
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// A system that returned an error during a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemFailure {
    pub system: String,
    /// The error and its causes, outermost first.
    pub message: String,
}

/// Timing and outcome of the last frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Wall-clock time per system that ran, in execution order.
    pub system_times: Vec<(String, Duration)>,
    /// Systems whose `run_if` was false.
    pub skipped: Vec<String>,
    /// Systems that returned an error, in execution order.
    pub failures: Vec<SystemFailure>,
    /// Deferred commands applied across all systems.
    pub commands_applied: usize,
    /// Deferred commands that failed to apply.
    pub commands_failed: usize,
    /// Time spent flushing deferred commands.
    pub command_apply_time: Duration,
    /// Whole frame, including event clearing.
    pub total_time: Duration,
}

impl FrameDiagnostics {
    /// Whether `system` ran this frame, successfully or not.
    pub fn ran(&self, system: &str) -> bool {
        self.system_times.iter().any(|(name, _)| name == system)
    }

    pub fn failed(&self, system: &str) -> bool {
        self.failures.iter().any(|f| f.system == system)
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Registered systems and the order they run in.
///
/// The order is a topological sort of the `after` edges. Systems with no
/// constraint between them keep registration order.
#[derive(Debug, Default)]
pub struct Schedule {
    /// Registration order.
    systems: Vec<System>,
    /// Indices into `systems`, in execution order.
    order: Vec<usize>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `system` and re-resolve the execution order.
    ///
    /// Fails without changing the schedule if the name is taken or the new
    /// constraints close a cycle.
    pub fn add_system(&mut self, system: System) -> Result<(), ScheduleError> {
        if self.systems.iter().any(|s| s.name == system.name) {
            return Err(ScheduleError::DuplicateSystem { name: system.name });
        }
        let name = system.name.clone();
        self.systems.push(system);
        match resolve_order(&self.systems) {
            Ok(order) => {
                self.order = order;
                debug!(system = %name, total = self.systems.len(), "system registered");
                Ok(())
            }
            Err(involved) => {
                self.systems.pop();
                Err(ScheduleError::DependencyCycle {
                    system: name,
                    involved,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Whether a system called `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.systems.iter().any(|s| s.name == name)
    }

    /// System names in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.systems[i].name.as_str()).collect()
    }

    /// Run every system once against `world`.
    ///
    /// Each system gets its own [`Commands`], flushed as soon as the system
    /// returns, whether it succeeded or not, so the next system sees its
    /// mutations. A failing system is logged and the loop moves on, unless
    /// `stop_on_error` is set, in which case the remaining systems are
    /// skipped and the failure is returned.
    pub fn run(
        &mut self,
        world: &mut World,
        stop_on_error: bool,
        diagnostics: &mut FrameDiagnostics,
    ) -> Result<(), ScheduleError> {
        for &index in &self.order {
            let system = &mut self.systems[index];
            if let Some(condition) = &system.condition {
                if !condition(world) {
                    trace!(system = %system.name, "run_if false; skipped");
                    diagnostics.skipped.push(system.name.clone());
                    continue;
                }
            }

            let start = Instant::now();
            let mut commands = Commands::for_system(world, &system.name);
            let result = (system.func)(&mut commands);
            let apply_start = Instant::now();
            let report = commands.flush();
            diagnostics.command_apply_time += apply_start.elapsed();
            diagnostics.commands_applied += report.success_count;
            diagnostics.commands_failed += report.failed_count;
            diagnostics.system_times.push((system.name.clone(), start.elapsed()));

            if let Err(e) = result {
                let message = format!("{e:#}");
                error!(system = %system.name, error = %message, "system failed");
                diagnostics.failures.push(SystemFailure {
                    system: system.name.clone(),
                    message: message.clone(),
                });
                if stop_on_error {
                    return Err(ScheduleError::SystemFailed {
                        system: system.name.clone(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm, always taking the lowest registration index that is
/// ready. On a cycle, returns the names that could not be placed.
fn resolve_order(systems: &[System]) -> Result<Vec<usize>, Vec<String>> {
    let n = systems.len();
    // before[i]: systems that must run before i.
    let mut before: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, system) in systems.iter().enumerate() {
        for dep in &system.after {
            match systems.iter().position(|s| &s.name == dep) {
                Some(j) if j != i => before[i].push(j),
                Some(_) => return Err(vec![system.name.clone()]),
                None => debug!(system = %system.name, after = %dep, "ordering constraint names an unregistered system; ignored for now"),
            }
        }
    }

    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n).find(|&i| !placed[i] && before[i].iter().all(|&j| placed[j]));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                return Err((0..n)
                    .filter(|&i| !placed[i])
                    .map(|i| systems[i].name.clone())
                    .collect());
            }
        }
    }
    Ok(order)
}
