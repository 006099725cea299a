//! Paging contract shared by repository queries and the event log.

use serde::{Deserialize, Serialize};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A 1-based page request.
///
/// Page number 0 is treated as the first page and the size is clamped to
/// `1..=MAX_PAGE_SIZE`, so every request maps to a valid window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    number: u32,
    size: u32,
}

impl PageRequest {
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn first(size: u32) -> Self {
        Self::new(1, size)
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of rows to skip before this page starts.
    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.size as usize
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub number: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            number: request.number(),
            size: request.size(),
        }
    }

    /// Slices an already sorted, fully materialized result set.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.limit())
            .collect();
        Self::new(items, total, request)
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.size))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            number: self.number,
            size: self.size,
        }
    }
}
