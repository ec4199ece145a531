//! # Process Manager Crate
//!
//! Owns the connections to session workers. `Controllable` is the RPC seam
//! a worker sits behind; `Process` binds one session to one connection; the
//! managers decide how failures are handled. Simulation dispatches in place
//! and treats any failure as fatal. Live fans calls out concurrently and,
//! when a worker dies mid-run, replaces it: fresh connection from the
//! factory, journal replay from the last checkpoint, then the calls that
//! queued up while the session was down, in arrival order.

pub mod error;
pub mod local;
pub mod manager;
pub mod process;

pub use error::{ProcessError, RpcError};
pub use local::{LocalControllable, LocalProcessFactory, ReceivedCall};
pub use manager::{
    LiveProcessManager, ProcessManager, RecoveryPolicy, SimulationProcessManager,
};
pub use process::{Controllable, InitParams, ParameterUpdate, Process, ProcessFactory};
