pub mod block_fifo;
pub mod format_converter;
pub mod pcm;
