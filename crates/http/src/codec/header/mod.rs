mod header_decoder;
pub use header_decoder::RequestHeadDecoder;
pub(crate) use header_decoder::is_chunked;

mod status_decoder;
pub use status_decoder::ResponseHeadDecoder;

mod header_encoder;
pub(crate) use header_encoder::encode_request_head;
pub(crate) use header_encoder::encode_response_head;
