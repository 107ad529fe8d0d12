//! XOP core: infoset events, quotas, identifiers and errors
//!
//! This module holds the pieces shared by the MTOM writer and reader.

mod charset;
mod error;
mod event;
mod ids;
mod quota;
mod stats;

pub use charset::Charset;
pub use error::{Error, ErrorKind, MalformedKind, Result};
pub use event::InfosetEvent;
pub use ids::{
    BOUNDARY_PREFIX, CONTENT_ID_DOMAIN, EntropySource, IdGenerator, RandomEntropy, SeededEntropy,
    collides,
};
pub use quota::{QuotaCategory, QuotaEnforcer, QuotaExceeded, Quotas, UNBOUNDED};
pub use stats::MessageStats;

/// XOP include namespace
pub const XOP_NAMESPACE: &str = "http://www.w3.org/2004/08/xop/include";

/// Local name of the XOP include element
pub const XOP_INCLUDE: &str = "Include";

/// Prefix used when writing `xop:Include`
pub const XOP_PREFIX: &str = "xop";

/// Media type of the root part
pub const XOP_MEDIA_TYPE: &str = "application/xop+xml";

/// Media type of the whole message
pub const MULTIPART_RELATED: &str = "multipart/related";

/// Default media type of attachment parts
pub const OCTET_STREAM: &str = "application/octet-stream";

/// URL scheme of part references
pub const CID_SCHEME: &str = "cid:";

/// Default start-info advertised for the root part payload
pub const DEFAULT_START_INFO: &str = "application/soap+xml";

/// Default inline threshold in bytes
pub const DEFAULT_INLINE_THRESHOLD: usize = 1024;
