//! The frame loop.

use std::time::Instant;

use tracing::{debug, info};
use voidscript_ecs::world::World;

use crate::config::EngineConfig;
use crate::schedule::{FrameDiagnostics, Schedule, System};
use crate::snapshot::AppSnapshot;
use crate::time::Time;
use crate::ScheduleError;

/// A world, the systems that run on it, and the frame counter.
pub struct App {
    world: World,
    schedule: Schedule,
    config: EngineConfig,
    frame: u64,
    last_diagnostics: FrameDiagnostics,
    /// State captured by [`enter_play_mode`](Self::enter_play_mode).
    edit_state: Option<AppSnapshot>,
}

impl App {
    /// App over an empty world. Fails if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self, ScheduleError> {
        Self::with_world(World::new(), config)
    }

    /// App over an existing world, e.g. one a scene was loaded into.
    pub fn with_world(world: World, config: EngineConfig) -> Result<Self, ScheduleError> {
        config.validate()?;
        Ok(Self {
            world,
            schedule: Schedule::new(),
            config,
            frame: 0,
            last_diagnostics: FrameDiagnostics::default(),
            edit_state: None,
        })
    }

    /// See [`Schedule::add_system`].
    pub fn add_system(&mut self, system: System) -> Result<(), ScheduleError> {
        self.schedule.add_system(system)
    }

    /// Run one frame.
    ///
    /// Returns `Err` only when `stop_on_system_error` is set and a system
    /// failed; event queues are cleared and the frame counter advances
    /// either way.
    pub fn update(&mut self) -> Result<(), ScheduleError> {
        let frame_start = Instant::now();
        let time = Time::fixed(self.frame, self.config.fixed_dt);
        self.world.insert_resource(time);

        let mut diagnostics = FrameDiagnostics::default();
        let result = self
            .schedule
            .run(&mut self.world, self.config.stop_on_system_error, &mut diagnostics);

        self.world.clear_events();
        self.frame += 1;
        diagnostics.total_time = frame_start.elapsed();
        if !diagnostics.failures.is_empty() {
            debug!(
                frame = time.frame,
                failures = diagnostics.failures.len(),
                "frame finished with failing systems"
            );
        }
        self.last_diagnostics = diagnostics;
        result
    }

    /// Run `count` frames, stopping at the first error.
    pub fn run_frames(&mut self, count: u64) -> Result<(), ScheduleError> {
        for _ in 0..count {
            self.update()?;
        }
        Ok(())
    }

    // -- play mode ----------------------------------------------------------

    /// Capture the current state so [`exit_play_mode`](Self::exit_play_mode)
    /// can put it back. Entering again while playing re-captures.
    pub fn enter_play_mode(&mut self) -> Result<(), ScheduleError> {
        let snapshot = self.capture_snapshot()?;
        info!(frame = self.frame, entities = snapshot.world.entities.len(), "entering play mode");
        self.edit_state = Some(snapshot);
        Ok(())
    }

    /// Restore the state captured on entering play mode.
    pub fn exit_play_mode(&mut self) -> Result<(), ScheduleError> {
        let snapshot = self.edit_state.take().ok_or(ScheduleError::NotInPlayMode)?;
        if let Err(e) = self.restore_snapshot(&snapshot) {
            self.edit_state = Some(snapshot);
            return Err(e);
        }
        info!(frame = self.frame, "left play mode");
        Ok(())
    }

    /// Between [`enter_play_mode`](Self::enter_play_mode) and [`exit_play_mode`](Self::exit_play_mode).
    pub fn is_playing(&self) -> bool {
        self.edit_state.is_some()
    }

    // -- accessors ------------------------------------------------------------

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames completed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub(crate) fn set_frame_count(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// Diagnostics of the most recent [`update`](Self::update); empty before the first frame.
    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("frame", &self.frame)
            .field("systems", &self.schedule.system_names())
            .field("playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}
