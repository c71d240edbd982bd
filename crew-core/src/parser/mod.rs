//! Worker output parsing

pub mod chunk;
pub mod stream_json;

pub use chunk::StreamChunk;
pub use stream_json::{parse, parse_all};
