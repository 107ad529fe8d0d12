//! Size quotas for a single MTOM message.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Internal stand-in for "no limit". Far below `u64::MAX` so accumulation never wraps.
pub const UNBOUNDED: u64 = i64::MAX as u64;

/// Category of a quota counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QuotaCategory {
    /// Total bytes of the message (cumulative).
    MessageBytes,
    /// Bytes of the current MIME part.
    PartBytes,
    /// Length of the current binary value.
    ArrayLength,
    /// Length of the current string value in characters.
    StringLength,
    /// Current element nesting depth.
    Depth,
}

impl QuotaCategory {
    const fn index(self) -> usize {
        match self {
            Self::MessageBytes => 0,
            Self::PartBytes => 1,
            Self::ArrayLength => 2,
            Self::StringLength => 3,
            Self::Depth => 4,
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MessageBytes => "message size",
            Self::PartBytes => "part size",
            Self::ArrayLength => "array length",
            Self::StringLength => "string length",
            Self::Depth => "depth",
        };
        write!(f, "{name}")
    }
}

/// A quota was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{category} quota exceeded: attempted {attempted} (limit {limit})")]
pub struct QuotaExceeded {
    /// Which bound was breached.
    pub category: QuotaCategory,
    /// Configured limit.
    pub limit: u64,
    /// Counter value the caller tried to reach.
    pub attempted: u64,
}

/// Optional upper bounds for one message. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quotas {
    /// Total message bytes.
    pub max_message_size: Option<u64>,
    /// Bytes of any single MIME part.
    pub max_part_size: Option<u64>,
    /// Bytes of any single binary value.
    pub max_array_length: Option<u64>,
    /// Characters of any single text or attribute value.
    pub max_string_length: Option<u64>,
    /// Element nesting depth.
    pub max_depth: Option<u64>,
}

impl Quotas {
    /// No limits at all.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_message_size: None,
            max_part_size: None,
            max_array_length: None,
            max_string_length: None,
            max_depth: None,
        }
    }

    /// Set the total message size bound.
    #[must_use]
    pub const fn with_max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = Some(max);
        self
    }

    /// Set the per-part size bound.
    #[must_use]
    pub const fn with_max_part_size(mut self, max: u64) -> Self {
        self.max_part_size = Some(max);
        self
    }

    /// Set the per-binary-value length bound.
    #[must_use]
    pub const fn with_max_array_length(mut self, max: u64) -> Self {
        self.max_array_length = Some(max);
        self
    }

    /// Set the per-string length bound.
    #[must_use]
    pub const fn with_max_string_length(mut self, max: u64) -> Self {
        self.max_string_length = Some(max);
        self
    }

    /// Set the nesting depth bound.
    #[must_use]
    pub const fn with_max_depth(mut self, max: u64) -> Self {
        self.max_depth = Some(max);
        self
    }

    /// Effective limit for a category, capped at [`UNBOUNDED`].
    #[must_use]
    pub fn limit(&self, category: QuotaCategory) -> u64 {
        let configured = match category {
            QuotaCategory::MessageBytes => self.max_message_size,
            QuotaCategory::PartBytes => self.max_part_size,
            QuotaCategory::ArrayLength => self.max_array_length,
            QuotaCategory::StringLength => self.max_string_length,
            QuotaCategory::Depth => self.max_depth,
        };
        configured.map_or(UNBOUNDED, |limit| limit.min(UNBOUNDED))
    }
}

/// Running counters checked against [`Quotas`].
///
/// `MessageBytes` accumulates over the whole message. The other categories
/// measure one item at a time and are restarted with [`QuotaEnforcer::reset`].
#[derive(Debug, Clone)]
pub struct QuotaEnforcer {
    quotas: Quotas,
    counters: [u64; 5],
}

impl QuotaEnforcer {
    /// Create an enforcer with all counters at zero.
    #[must_use]
    pub const fn new(quotas: Quotas) -> Self {
        Self {
            quotas,
            counters: [0; 5],
        }
    }

    /// Add `amount` to the category counter and check the bound.
    ///
    /// On failure the counter is left unchanged.
    pub fn charge(&mut self, category: QuotaCategory, amount: u64) -> Result<(), QuotaExceeded> {
        let limit = self.quotas.limit(category);
        let slot = &mut self.counters[category.index()];
        let attempted = slot.saturating_add(amount);
        if attempted > limit {
            return Err(QuotaExceeded {
                category,
                limit,
                attempted,
            });
        }
        *slot = attempted;
        Ok(())
    }

    /// Check a single item against the bound without touching the counter.
    pub fn check(&self, category: QuotaCategory, amount: u64) -> Result<(), QuotaExceeded> {
        let limit = self.quotas.limit(category);
        if amount > limit {
            return Err(QuotaExceeded {
                category,
                limit,
                attempted: amount,
            });
        }
        Ok(())
    }

    /// Lower a counter, e.g. when leaving an element.
    pub fn release(&mut self, category: QuotaCategory, amount: u64) {
        let slot = &mut self.counters[category.index()];
        *slot = slot.saturating_sub(amount);
    }

    /// Start a new item scope for a per-item category.
    pub fn reset(&mut self, category: QuotaCategory) {
        self.counters[category.index()] = 0;
    }

    /// Charge one whole item: reset, then charge its full size.
    pub fn charge_item(&mut self, category: QuotaCategory, amount: u64) -> Result<(), QuotaExceeded> {
        self.reset(category);
        self.charge(category, amount)
    }

    /// Current counter value.
    #[must_use]
    pub fn used(&self, category: QuotaCategory) -> u64 {
        self.counters[category.index()]
    }
}
