//! Whole-app snapshot and restore.
//!
//! [`AppSnapshot`] is the world snapshot plus the frame counter. Systems,
//! resources and pending events are not captured: systems stay registered
//! on the app, and resources and events belong to the frame loop rather
//! than to the edited state.

use serde::{Deserialize, Serialize};
use tracing::debug;
use voidscript_ecs::snapshot::WorldSnapshot;

use crate::app::App;
use crate::ScheduleError;

/// An [`App`] frozen between frames. Systems are not captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub world: WorldSnapshot,
    /// Frames completed at capture time.
    pub frame: u64,
    /// Step length at capture, checked again on restore.
    pub fixed_dt: f64,
}

impl App {
    /// Capture the world and frame counter, along with the configured `fixed_dt`.
    pub fn capture_snapshot(&self) -> Result<AppSnapshot, ScheduleError> {
        Ok(AppSnapshot {
            world: self.world().capture_snapshot()?,
            frame: self.frame_count(),
            fixed_dt: self.config().fixed_dt,
        })
    }

    /// Put the world and frame counter back as they were at capture.
    ///
    /// Nothing changes if the snapshot cannot be restored (for example it
    /// names a component type this app never registered).
    pub fn restore_snapshot(&mut self, snapshot: &AppSnapshot) -> Result<(), ScheduleError> {
        if !(snapshot.fixed_dt > 0.0 && snapshot.fixed_dt.is_finite()) {
            return Err(ScheduleError::InvalidConfig {
                details: format!("snapshot has invalid fixed_dt: {}", snapshot.fixed_dt),
            });
        }
        self.world_mut().restore_snapshot(&snapshot.world)?;
        self.world_mut().clear_events();
        self.set_frame_count(snapshot.frame);
        debug!(frame = snapshot.frame, entities = snapshot.world.entities.len(), "app restored from snapshot");
        Ok(())
    }
}
