mod codec_port;
mod completion_port;
mod context_port;
mod fetch_port;

pub use codec_port::ImageCodec;
pub use completion_port::CompletionSink;
pub use context_port::ExecutionContext;
pub use fetch_port::{ByteStream, ImageFetcher};
