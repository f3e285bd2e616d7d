//! The node task and its handle

mod core;
mod handle;
mod messages;

pub use core::Node;
pub use handle::CrosslinkHandle;
pub use messages::{NodeRequest, NodeSnapshot};
