//! Index-stable storage with check-out/check-in borrowing.
//!
//! Devices and callbacks receive `&mut Machine` while they run, so the
//! machine cannot keep a borrow of them at the same time. Instead the value is
//! moved out of its slot for the duration of the call and moved back after.
//! A slot that is checked out reports [`SlotError::Busy`] to anyone else who
//! asks for it. Indices are never reused, so a stale handle can only ever hit a
//! vacant slot.

#[derive(Debug)]
enum SlotValue<T> {
    Occupied(T),
    CheckedOut,
    Vacant,
}

/// Why a slot could not be checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotError {
    /// The value is currently checked out.
    Busy,
    /// Nothing lives at this index (never allocated or removed).
    Vacant,
}

#[derive(Debug)]
pub(crate) struct Slots<T> {
    entries: Vec<SlotValue<T>>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Slots<T> {
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(SlotValue::Occupied(value));
        index
    }

    pub(crate) fn get(&self, index: u32) -> Option<&T> {
        match self.entries.get(index as usize) {
            Some(SlotValue::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        match self.entries.get_mut(index as usize) {
            Some(SlotValue::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Live means occupied or checked out.
    pub(crate) fn is_live(&self, index: u32) -> bool {
        matches!(
            self.entries.get(index as usize),
            Some(SlotValue::Occupied(_) | SlotValue::CheckedOut)
        )
    }

    pub(crate) fn is_checked_out(&self, index: u32) -> bool {
        matches!(
            self.entries.get(index as usize),
            Some(SlotValue::CheckedOut)
        )
    }

    pub(crate) fn checkout(&mut self, index: u32) -> Result<T, SlotError> {
        let Some(entry) = self.entries.get_mut(index as usize) else {
            return Err(SlotError::Vacant);
        };
        match std::mem::replace(entry, SlotValue::CheckedOut) {
            SlotValue::Occupied(value) => Ok(value),
            SlotValue::CheckedOut => Err(SlotError::Busy),
            SlotValue::Vacant => {
                *entry = SlotValue::Vacant;
                Err(SlotError::Vacant)
            }
        }
    }

    /// Returns a checked-out value. Returns it back to the caller if the slot
    /// was removed in the meantime.
    pub(crate) fn checkin(&mut self, index: u32, value: T) -> Option<T> {
        match self.entries.get_mut(index as usize) {
            Some(entry) if matches!(entry, SlotValue::CheckedOut) => {
                *entry = SlotValue::Occupied(value);
                None
            }
            _ => Some(value),
        }
    }

    /// Removes a value. A checked-out value is dropped at check-in.
    pub(crate) fn remove(&mut self, index: u32) -> Option<T> {
        let entry = self.entries.get_mut(index as usize)?;
        match std::mem::replace(entry, SlotValue::Vacant) {
            SlotValue::Occupied(value) => Some(value),
            SlotValue::CheckedOut | SlotValue::Vacant => None,
        }
    }

    pub(crate) fn live_indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0_u32..)
            .zip(self.entries.iter())
            .filter(|(_, entry)| !matches!(entry, SlotValue::Vacant))
            .map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotError, Slots};

    #[test]
    fn checkout_marks_slot_busy_until_checkin() {
        let mut slots = Slots::default();
        let index = slots.insert(String::from("cpu"));

        let value = slots.checkout(index).expect("occupied");
        assert!(slots.is_live(index));
        assert!(slots.is_checked_out(index));
        assert_eq!(slots.checkout(index), Err(SlotError::Busy));
        assert!(slots.get(index).is_none());

        assert!(slots.checkin(index, value).is_none());
        assert_eq!(slots.get(index).map(String::as_str), Some("cpu"));
    }

    #[test]
    fn removal_during_checkout_drops_on_checkin() {
        let mut slots = Slots::default();
        let index = slots.insert(7_u32);
        let value = slots.checkout(index).expect("occupied");

        assert_eq!(slots.remove(index), None);
        assert_eq!(slots.checkin(index, value), Some(7));
        assert!(!slots.is_live(index));
        assert_eq!(slots.checkout(index), Err(SlotError::Vacant));
    }

    #[test]
    fn indices_are_never_reused() {
        let mut slots = Slots::default();
        let first = slots.insert(1_u8);
        slots.remove(first);
        let second = slots.insert(2_u8);
        assert_ne!(first, second);
        assert_eq!(slots.live_indices().collect::<Vec<_>>(), vec![second]);
        assert_eq!(second, 1);
    }
}
