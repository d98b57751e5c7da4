//! Timing of the single active session. [state] holds the pure state machine,
//! [engine::ClockEngine] adds persistence, the native wake-up and the tick loop.

pub mod engine;
pub mod state;
pub mod store;

pub use engine::{ClockEngine, ClockEvent, ClockSnapshot};
pub use state::{ClockError, Session, SessionKind, TimerMode, TimerPhase, TimerState};
