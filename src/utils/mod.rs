//! Process-level helpers shared by the relay, the router and the binary.

pub mod bootstrap;
pub mod retry;
pub mod shutdown;
