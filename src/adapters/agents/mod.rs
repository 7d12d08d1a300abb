//! Agent adapters: concrete implementations of the `Agent` port.

pub mod mock;
pub mod registry;
pub mod subprocess;

pub use mock::{MockAgent, MockResponse};
pub use registry::AgentRegistry;
pub use subprocess::SubprocessAgent;
