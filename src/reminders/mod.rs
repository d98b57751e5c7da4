//! Reminder scheduling: pure trigger arithmetic in [recurrence], the rebuild protocol in
//! [scheduler::RecurrenceScheduler], and the store seam in [store].

pub mod recurrence;
pub mod scheduler;
pub mod spec;
pub mod store;
