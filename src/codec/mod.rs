//! MTOM writer and reader, and the two factory entry points.

mod config;
mod reader;
mod writer;

use std::io::Write;

use bytes::Bytes;

pub use config::{MAX_BOUNDARY_LEN, ReaderConfig, WriterConfig, is_valid_boundary};
pub use reader::{CloseCallback, MtomReader};
pub use writer::MtomWriter;

use crate::xop::{Charset, Quotas, Result};

/// Create a writer.
///
/// `max_size_in_bytes` bounds the whole message. Empty `boundary` or
/// `start_uri` are generated. `start_info` is the media type of the root
/// part payload, e.g. `application/soap+xml`.
#[allow(clippy::too_many_arguments)]
#[allow(clippy::fn_params_excessive_bools)]
pub fn create_writer<W: Write>(
    sink: W,
    encoding: Charset,
    max_size_in_bytes: u64,
    start_info: &str,
    boundary: &str,
    start_uri: &str,
    write_message_headers: bool,
    owns_stream: bool,
) -> Result<MtomWriter<W>> {
    let mut config = WriterConfig::default()
        .with_charset(encoding)
        .with_start_info(start_info)
        .with_message_headers(write_message_headers)
        .with_owns_stream(owns_stream)
        .with_quotas(Quotas::unbounded().with_max_message_size(max_size_in_bytes));
    if !boundary.is_empty() {
        config = config.with_boundary(boundary);
    }
    if !start_uri.is_empty() {
        config = config.with_start_uri(start_uri);
    }
    MtomWriter::new(sink, config)
}

/// Create a reader over `buffer[offset..offset + count]`.
///
/// `encodings` lists the acceptable root part encodings in priority order.
/// Use [`MtomReader::on_close`] to learn how many bytes the message used.
pub fn create_reader(
    buffer: impl Into<Bytes>,
    offset: usize,
    count: usize,
    encodings: &[Charset],
    quotas: Quotas,
) -> Result<MtomReader> {
    let config = ReaderConfig::default()
        .with_encodings(encodings.to_vec())
        .with_quotas(quotas);
    MtomReader::new(buffer.into(), offset, count, config)
}
