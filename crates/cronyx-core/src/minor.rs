//! Bounded device minor-number table.
//!
//! Minor `0` belongs to the control device. Minors `1..=pool` are handed out to
//! channel items that expose a device file. The table is mutated only with the
//! administrative lock held; its own mutex merely makes it `Sync`.

use crate::error::{BinderError, BinderResult};
use crate::item::ItemId;
use crate::limits::MINOR_WARN_INTERVAL;
use std::time::Instant;
use tracing::warn;

/// Slot table mapping minors to item ids.
#[derive(Debug)]
pub struct MinorTable {
    slots: Vec<Option<ItemId>>,
    last_warning: Option<Instant>,
    suppressed: u64,
}

impl MinorTable {
    /// Creates a table with `pool` allocatable minors.
    pub fn new(pool: usize) -> Self {
        Self {
            slots: vec![None; pool],
            last_warning: None,
            suppressed: 0,
        }
    }

    /// Number of allocatable minors.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of minors in use.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Minor held by `id`, if any.
    pub fn minor_of(&self, id: ItemId) -> Option<i32> {
        self.slots
            .iter()
            .position(|slot| *slot == Some(id))
            .map(Self::minor_for_index)
    }

    /// Item holding `minor`.
    pub fn item_at(&self, minor: i32) -> Option<ItemId> {
        let index = usize::try_from(minor).ok()?.checked_sub(1)?;
        self.slots.get(index).copied().flatten()
    }

    /// Binds the lowest free minor to `id`.
    pub fn allocate(&mut self, id: ItemId) -> BinderResult<i32> {
        if let Some(minor) = self.minor_of(id) {
            return Err(BinderError::AlreadyExists(format!(
                "item {id} already holds minor {minor}"
            )));
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(id);
                Ok(Self::minor_for_index(index))
            }
            None => {
                self.warn_exhausted(id);
                Err(BinderError::ResourceExhausted(format!(
                    "no free minor among {}",
                    self.slots.len()
                )))
            }
        }
    }

    /// Frees the minor held by `id`; returns it.
    pub fn release(&mut self, id: ItemId) -> Option<i32> {
        let index = self.slots.iter().position(|slot| *slot == Some(id))?;
        self.slots[index] = None;
        Some(Self::minor_for_index(index))
    }

    fn minor_for_index(index: usize) -> i32 {
        i32::try_from(index + 1).unwrap_or(i32::MAX)
    }

    fn warn_exhausted(&mut self, id: ItemId) {
        let now = Instant::now();
        let due = self
            .last_warning
            .map_or(true, |last| now.duration_since(last) >= MINOR_WARN_INTERVAL);
        if due {
            warn!(
                item = %id,
                pool = self.slots.len(),
                suppressed = self.suppressed,
                "minor numbers exhausted"
            );
            self.last_warning = Some(now);
            self.suppressed = 0;
        } else {
            self.suppressed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_minors_start_at_one() {
        let mut table = MinorTable::new(4);
        assert_eq!(table.allocate(ItemId::new(10)).unwrap(), 1);
        assert_eq!(table.allocate(ItemId::new(11)).unwrap(), 2);
        assert_eq!(table.item_at(2), Some(ItemId::new(11)));
        assert_eq!(table.item_at(0), None);
        assert_eq!(table.item_at(-1), None);
    }

    #[test]
    fn test_second_minor_for_same_item_rejected() {
        let mut table = MinorTable::new(4);
        table.allocate(ItemId::new(3)).unwrap();
        let err = table.allocate(ItemId::new(3)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[traced_test]
    #[test]
    fn test_exhaustion_and_reuse() {
        let mut table = MinorTable::new(3);
        for id in 1..=3 {
            table.allocate(ItemId::new(id)).unwrap();
        }
        let err = table.allocate(ItemId::new(4)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceExhausted);
        assert!(logs_contain("minor numbers exhausted"));

        assert_eq!(table.release(ItemId::new(2)), Some(2));
        assert_eq!(table.allocate(ItemId::new(4)).unwrap(), 2);
        assert_eq!(table.in_use(), 3);
    }

    #[test]
    fn test_exhaustion_warning_is_rate_limited() {
        let mut table = MinorTable::new(0);
        for id in 1..=5 {
            assert!(table.allocate(ItemId::new(id)).is_err());
        }
        assert_eq!(table.suppressed, 4);
    }
}
