pub mod audio_engine;
pub mod block_source;
pub mod capture_events;
pub mod capture_sink;
pub mod clock;
