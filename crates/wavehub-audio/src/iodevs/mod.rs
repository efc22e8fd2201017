//! Concrete `IoDev` backends (spec.md §4.2).

pub mod cpal_dev;
pub mod empty;
pub mod loopback;
pub mod test_dev;

pub use cpal_dev::CpalIoDev;
pub use empty::EmptyIoDev;
pub use loopback::LoopbackIoDev;
pub use test_dev::TestIoDev;
