//! Everything that talks to the rendering engine: wire protocol, links, lifecycle.

pub mod handle;
/// Transport traits implemented by the subprocess and simulated engines.
pub mod link;
pub mod process;
pub mod protocol;
pub mod sim;
