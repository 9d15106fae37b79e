//! Delivery task routing
//!
//! - [`task`]: task records and their lifecycle
//! - [`router`]: claiming, progress, cancellation and expiry
//! - [`events`]: status change notifications
//! - [`sweeper`]: background expiry

pub mod events;
pub mod router;
pub mod sweeper;
pub mod task;

pub use events::{NoopSink, TaskEventBus, TaskEventSink, TaskStatusChanged};
pub use router::{CancelActor, CourierCandidate, TaskRouter};
pub use sweeper::spawn_sweeper;
pub use task::{Task, TaskStatus};
