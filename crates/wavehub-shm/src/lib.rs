//! Wavehub Shared-Memory Layer
//!
//! Two independent regions, both described in spec.md §3/§4.5/§9:
//! - [`ring`]: the per-stream producer/consumer audio ring (`StreamShm`).
//! - [`server_state`]: the single-writer/many-reader server state seq-lock
//!   (`ServerStateShm`).
//!
//! Neither type here owns a socket or an fd hand-off; `wavehub-daemon`
//! wires these into the control/audio threads and the client connections.

mod error;
mod ring;
mod server_state;

pub use error::{ShmError, ShmResult};
pub use ring::{ReadView, ShmConfig, StreamShm, WriteGuard};
pub use server_state::{ServerStateShm, ServerStateSnapshot};
