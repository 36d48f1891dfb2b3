pub mod audio;
pub mod config;
pub mod ui;

pub use audio::{AudioConfig, LooperError, MixEngine, RecordingSession};
pub use config::Settings;
pub use ui::TerminalUI;
