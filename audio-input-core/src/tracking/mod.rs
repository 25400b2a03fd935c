pub mod glitch;
pub mod timestamp;
