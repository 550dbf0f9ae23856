pub mod controller;
pub mod engine;

pub use controller::PlaybackController;
pub use engine::{EngineErrorKind, EngineEvent, MediaEngine, SessionId};
