//! VoidScript engine -- the per-frame driver for `voidscript-ecs`.
//!
//! An [`App`](app::App) owns a [`World`](voidscript_ecs::world::World) and a
//! [`Schedule`](schedule::Schedule). Each call to
//! [`update`](app::App::update) runs one frame:
//!
//! 1. The [`Time`](time::Time) resource advances by the fixed step.
//! 2. Systems run in their resolved order. A system whose `run_if`
//!    condition is false is skipped for the frame. Each system's deferred
//!    commands are flushed before the next system starts.
//! 3. A system that returns an error is logged and the frame continues.
//! 4. Every event queue is cleared, so events live for exactly one frame.
//!
//! # Quick Start
//!
//! ```
//! use voidscript_engine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32 }
//!
//! let mut app = App::new(EngineConfig::default()).unwrap();
//! app.world_mut().register_component::<Position>("Position");
//! let e = app.world_mut().spawn_with(Position { x: 0.0 }).unwrap();
//!
//! app.add_system(System::new("move", |cmds: &mut Commands| {
//!     let dt = cmds.resource::<Time>()?.delta as f32;
//!     cmds.query_mut::<(&mut Position,)>().each(|_, (p,)| p.x += 60.0 * dt);
//!     Ok(())
//! }))
//! .unwrap();
//!
//! app.run_frames(3).unwrap();
//! let x = app.world().get_component::<Position>(e).unwrap().x;
//! assert!((x - 3.0).abs() < 1e-4);
//! ```

#![deny(unsafe_code)]

pub mod app;
pub mod config;
pub mod logging;
pub mod schedule;
pub mod snapshot;
pub mod time;

use voidscript_ecs::EcsError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scheduling, configuration and the frame loop.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A system with this name is already registered.
    #[error("duplicate system name: {name:?}")]
    DuplicateSystem { name: String },

    /// Adding `system` would close a cycle through `involved`.
    #[error("adding system '{system}' creates a dependency cycle among [{}]", involved.join(", "))]
    DependencyCycle { system: String, involved: Vec<String> },

    /// A configuration value is out of range.
    #[error("invalid engine config: {details}")]
    InvalidConfig { details: String },

    /// Configuration text is not valid JSON for [`EngineConfig`](config::EngineConfig).
    #[error("malformed engine config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Only returned when `stop_on_system_error` is set.
    #[error("system '{system}' failed: {message}")]
    SystemFailed { system: String, message: String },

    /// `exit_play_mode` was called without a matching `enter_play_mode`.
    #[error("not in play mode")]
    NotInPlayMode,

    /// An ECS operation failed outside any system.
    #[error(transparent)]
    Ecs(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports, including the ECS prelude.
pub mod prelude {
    pub use voidscript_ecs::prelude::*;

    pub use crate::app::App;
    pub use crate::config::EngineConfig;
    pub use crate::logging::init_logging;
    pub use crate::schedule::{FrameDiagnostics, Schedule, System, SystemFailure};
    pub use crate::snapshot::AppSnapshot;
    pub use crate::time::Time;
    pub use crate::ScheduleError;
}
