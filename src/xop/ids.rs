//! Boundary and Content-ID generation.

use std::fmt::Write as _;

use tracing::debug;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::mime::find;

/// Source of randomness for boundary and content-id tokens.
pub trait EntropySource {
    /// Next 64 bits of entropy.
    fn next_u64(&mut self) -> u64;
}

/// Entropy backed by random UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomEntropy;

impl EntropySource for RandomEntropy {
    fn next_u64(&mut self) -> u64 {
        let uuid = Uuid::new_v4();
        let bytes = uuid.as_bytes();
        u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }
}

/// Deterministic entropy: xxh3 of a counter under a fixed seed.
#[derive(Debug, Clone, Copy)]
pub struct SeededEntropy {
    seed: u64,
    counter: u64,
}

impl SeededEntropy {
    /// Create a source that always yields the same sequence for `seed`.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }
}

impl EntropySource for SeededEntropy {
    fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        xxh3_64_with_seed(&self.counter.to_le_bytes(), self.seed)
    }
}

/// Prefix of generated boundaries.
pub const BOUNDARY_PREFIX: &str = "MIMEBoundary_";

/// Domain used on the right-hand side of generated content-ids.
pub const CONTENT_ID_DOMAIN: &str = "mtom";

/// Generates boundary tokens and content-ids for one message.
pub struct IdGenerator {
    entropy: Box<dyn EntropySource + Send>,
    prefix: String,
    next_part: u64,
}

impl IdGenerator {
    /// Create a generator drawing from `entropy`.
    pub fn new(entropy: impl EntropySource + Send + 'static) -> Self {
        let mut entropy: Box<dyn EntropySource + Send> = Box::new(entropy);
        let prefix = format!("{:016x}", entropy.next_u64());
        Self {
            entropy,
            prefix,
            next_part: 1,
        }
    }

    /// Generator backed by [`RandomEntropy`].
    #[must_use]
    pub fn random() -> Self {
        Self::new(RandomEntropy)
    }

    /// Generator backed by [`SeededEntropy`].
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(SeededEntropy::new(seed))
    }

    /// Session-unique prefix shared by this generator's content-ids.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Content-id of the root part.
    #[must_use]
    pub fn start_id(&self) -> String {
        format!("root.{}@{CONTENT_ID_DOMAIN}", self.prefix)
    }

    /// Next attachment content-id. Never repeats within this generator.
    pub fn next_content_id(&mut self) -> String {
        let n = self.next_part;
        self.next_part += 1;
        format!("{n}.{}@{CONTENT_ID_DOMAIN}", self.prefix)
    }

    /// Fresh boundary candidate.
    pub fn boundary(&mut self) -> String {
        let mut token = String::with_capacity(BOUNDARY_PREFIX.len() + 32);
        token.push_str(BOUNDARY_PREFIX);
        for _ in 0..2 {
            let _ = write!(token, "{:016x}", self.entropy.next_u64());
        }
        token
    }

    /// Boundary that does not occur in any of `parts`.
    pub fn boundary_avoiding<'a, I>(&mut self, parts: I) -> String
    where
        I: IntoIterator<Item = &'a [u8]> + Clone,
    {
        let mut attempts = 0u32;
        loop {
            let candidate = self.boundary();
            if !collides(&candidate, parts.clone()) {
                if attempts > 0 {
                    debug!(attempts, "regenerated colliding boundary");
                }
                return candidate;
            }
            attempts += 1;
        }
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("prefix", &self.prefix)
            .field("next_part", &self.next_part)
            .finish_non_exhaustive()
    }
}

/// Whether `--boundary` occurs inside any of `parts`.
pub fn collides<'a, I>(boundary: &str, parts: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary.as_bytes());
    parts
        .into_iter()
        .any(|part| find(part, &delimiter, 0).is_some())
}
