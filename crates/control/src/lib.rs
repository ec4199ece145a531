//! # Control Crate
//!
//! The orchestration layer of the control plane. The `ControlMode` owns the
//! running sessions, the broker and the process manager: it validates and
//! applies run/stop requests, buffers parameter changes, and fans every
//! tick out to the workers in a fixed order — stops, then parameter
//! updates, then the clock event, then the broker snapshot — journaling
//! each step so a recovering worker sees the same decisions.
//!
//! The `EventLoop` is the single-threaded driver on top: it advances every
//! registered clock to the next pending timestamp, collects the signals,
//! and invokes the control mode once per tick. Concurrency lives below, in
//! the process manager's fan-out; nothing in here mutates tick-local state
//! from more than one task.

pub mod error;
pub mod event_loop;
pub mod mode;
pub mod session;

pub use error::ControlError;
pub use event_loop::{EventLoop, LoopCommand};
pub use mode::ControlMode;
pub use session::{RunParams, Session, StopParams};
