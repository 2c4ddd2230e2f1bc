pub mod hosted;
pub mod scripted;
pub mod stub;

pub use hosted::{HostedBackend, HostedConfig};
pub use scripted::ScriptedBackend;
pub use stub::StubBackend;
