//! Live allocation byte counter with high-water mark.

use std::fmt;

use serde::Serialize;

/// Tracks live allocated bytes and the maximum ever reached.
///
/// Every call counts as an allocation or free. Negative sizes mean the size
/// was not logged; they are counted but do not move the byte totals. Byte
/// totals saturate at the `i64` bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HwmCounter {
    value: i64,
    hwm: i64,
    allocations: u64,
    frees: u64,
}

impl HwmCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, size: i64) {
        self.allocations += 1;
        if size < 0 {
            return;
        }
        self.value = self.value.saturating_add(size);
        self.hwm = self.hwm.max(self.value);
    }

    pub fn subtract(&mut self, size: i64) {
        self.frees += 1;
        if size < 0 {
            return;
        }
        self.value = self.value.saturating_sub(size);
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    #[must_use]
    pub fn hwm(&self) -> i64 {
        self.hwm
    }

    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    #[must_use]
    pub fn frees(&self) -> u64 {
        self.frees
    }

    /// True once any bytes have been recorded.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.hwm != 0
    }
}

impl fmt::Display for HwmCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total:{} HWM:{} {} allocations, {} frees",
            self.value, self.hwm, self.allocations, self.frees
        )
    }
}
