//! Local-first core for timing an activity session, reconciling a location track written by a
//! background collector, and keeping reminder wake-ups scheduled across restarts.

pub mod cli;
pub mod clock;
pub mod fs;
pub mod reminders;
pub mod runtime;
pub mod track;
pub mod utils;
pub mod wakeup;
