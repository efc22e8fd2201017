//! Wavehub Core Data Model
//!
//! The device/stream plumbing described in spec.md §3-§4.5: the `iodev`
//! capability set, `rstream`/`dev_stream`/`active_dev`, the opaque format
//! converter, buffer-share accounting, and the streams registry arena.
//! Concrete `iodev` implementations and the scheduling engine that drives
//! all of this live in `wavehub-audio`; this crate only owns the shapes.

pub mod active_dev;
pub mod config;
pub mod converter;
pub mod dev_stream;
pub mod error;
pub mod iodev;
pub mod registry;
pub mod stream;

pub use active_dev::{ActiveDev, BuffState, DeviceState};
pub use config::{DaemonConfig, StreamConfig};
pub use converter::{create_converter, FormatConverter};
pub use dev_stream::DevStream;
pub use error::{CoreError, CoreResult};
pub use iodev::{DevBuffer, IoDev, IoNode};
pub use registry::StreamRegistry;
pub use stream::{Rstream, StreamId};
