//! MTOM/XOP codec - XML infosets with binary values to and from MIME multipart/related
//!
//! The writer serializes infoset events into a multipart/related message
//! whose root part is `application/xop+xml`; large binary values travel in
//! their own parts and are referenced from the XML by `xop:Include`. The
//! reader reverses this and resolves every `xop:Include` back into a binary
//! value.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mtom::{Charset, InfosetEvent, Quotas, create_reader, create_writer};
//!
//! let mut writer = create_writer(
//!     Vec::new(),
//!     Charset::Utf8,
//!     u64::MAX,
//!     "application/soap+xml",
//!     "",
//!     "",
//!     true,
//!     false,
//! )?;
//! writer.write_start_element("Envelope", "http://www.w3.org/2003/05/soap-envelope")?;
//! writer.write_binary(vec![0u8; 4096], "image/png")?;
//! writer.write_end_element()?;
//! writer.finish()?;
//! let bytes = writer.into_inner().unwrap_or_default();
//!
//! let len = bytes.len();
//! let mut reader = create_reader(bytes, 0, len, &[Charset::Utf8], Quotas::unbounded())?;
//! while let Some(event) = reader.next_event()? {
//!     if let InfosetEvent::BinaryValue { bytes, .. } = event {
//!         assert_eq!(bytes.len(), 4096);
//!     }
//! }
//! # Ok::<(), mtom::Error>(())
//! ```
//!
//! # Features
//!
//! - **Zero-copy attachments** - binary values read from a message are views into the input
//! - **Configurable inlining** - values below a threshold stay in the XML as base64
//! - **Quotas** - message, part, array, string and depth bounds
//! - **Deterministic ids** - seedable boundaries and content-ids for tests

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod codec;
pub mod mime;
pub mod xml;
pub mod xop;

pub use codec::{MtomReader, MtomWriter, ReaderConfig, WriterConfig, create_reader, create_writer};
pub use xop::{
    Charset, Error, ErrorKind, InfosetEvent, MalformedKind, MessageStats, QuotaCategory,
    QuotaExceeded, Quotas, Result,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
