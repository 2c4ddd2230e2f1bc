mod backend;
pub mod backends;
mod result;

pub use backend::{DetectorBackend, SharedBackend};
pub use backends::{HostedBackend, HostedConfig, ScriptedBackend, StubBackend};
pub use result::{color_for_label, BBox, Detection, ObjectClass};
