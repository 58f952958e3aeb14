//! Long-running tasks built from the config file
//!
//! Every worker shares the node's cancellation token and returns once it is
//! cancelled. An `Err` means the worker could not continue at all.

mod forward;
mod listen;
mod remote;

pub use forward::ForwardWorker;
pub use listen::run_listener;
pub use remote::run_remote;
