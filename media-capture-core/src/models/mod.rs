pub mod audio_format;
pub mod config;
pub mod device;
pub mod error;
pub mod metadata;
pub mod recording_result;
pub mod state;
