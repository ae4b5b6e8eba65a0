//! Incremental byte-stream codecs.
//!
//! Codecs are plain [`tokio_util::codec`] encoder/decoder pairs so they can
//! be tested and reused without a live connection; the adapter forms in
//! each submodule bind them into a connection's adapter chain.

pub mod chunked;
