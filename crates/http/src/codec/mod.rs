//! Wire codecs for HTTP/1.x message framing, split by direction:
//! decoders produce a head message followed by a stream of payload
//! items, encoders serialize a complete in-memory message in one call.

mod body;
mod head_decoder;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;

pub use body::{LengthDecoder, PayloadDecoder};
pub use head_decoder::{MAX_HEADER_BYTES, MAX_HEADER_NUM, RequestHeadDecoder, ResponseHeadDecoder};
pub use request_decoder::RequestDecoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;
pub use response_encoder::ResponseEncoder;
