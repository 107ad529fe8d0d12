/// Per-message counters kept by a writer or reader instance.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStats {
    /// MIME parts including the root part.
    pub parts: u64,
    /// Binary values carried inline as base64.
    pub inlined_values: u64,
    /// Binary values carried in their own part.
    pub externalized_values: u64,
    /// Bytes of binary content (inlined and externalized).
    pub binary_bytes: u64,
    /// Bytes written to the sink or consumed from the input.
    pub message_bytes: u64,
}

impl MessageStats {
    pub(crate) fn record_binary(&mut self, len: usize, externalized: bool) {
        if externalized {
            self.externalized_values += 1;
        } else {
            self.inlined_values += 1;
        }
        self.binary_bytes = self.binary_bytes.saturating_add(len as u64);
    }

    /// Attachments, i.e. parts other than the root part.
    #[must_use]
    pub fn attachments(&self) -> u64 {
        self.parts.saturating_sub(1)
    }
}
