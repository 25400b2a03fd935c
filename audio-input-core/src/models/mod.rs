pub mod audio_block;
pub mod audio_format;
pub mod config;
pub mod error;
pub mod state;
pub mod stats;
