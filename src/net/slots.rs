//! Fixed-capacity table of live sessions with generation-tagged keys.
//!
//! # Responsibilities
//! - Hand out a slot per accepted client, bounded by `max_connections`
//! - Map poll tokens back to the owning slot and socket side
//! - Reject stale tokens for slots that were freed and reused
//!
//! # Design Decisions
//! - A freed slot bumps its generation, so events queued for the previous
//!   occupant never reach the new one
//! - Token layout: generation in the high 32 bits, slot index shifted by
//!   one, socket side in the lowest bit

use mio::Token;

/// Reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Reserved for the shutdown waker.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const INDEX_BITS: u32 = 31;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;

/// Which socket of a session an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Origin,
}

/// Stable handle to an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    index: usize,
    generation: u32,
}

impl SlotKey {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Poll token for one side of this slot.
    pub fn token(&self, side: Side) -> Token {
        let side_bit = match side {
            Side::Client => 0,
            Side::Origin => 1,
        };
        Token(((self.generation as usize) << 32) | (self.index << 1) | side_bit)
    }

    /// Decode a poll token. Reserved tokens decode to `None`.
    pub fn from_token(token: Token) -> Option<(SlotKey, Side)> {
        if token == LISTENER_TOKEN || token == WAKER_TOKEN {
            return None;
        }
        let raw = token.0;
        let side = if raw & 1 == 0 { Side::Client } else { Side::Origin };
        let index = (raw >> 1) & INDEX_MASK;
        let generation = (raw >> 32) as u32;
        Some((SlotKey { index, generation }, side))
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Bounded slot table.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(INDEX_MASK);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        // Lowest indices are handed out first.
        let free = (0..capacity).rev().collect();
        Self { slots, free, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Place a value in a free slot, or hand it back when the table is full.
    pub fn insert(&mut self, value: T) -> Result<SlotKey, T> {
        let Some(index) = self.free.pop() else {
            return Err(value);
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.len += 1;
        Ok(SlotKey {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Free a slot. Its key, and every token derived from it, goes stale.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Keys of occupied slots in index order.
    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| SlotKey {
                index,
                generation: slot.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_table_returns_value() {
        let mut table = SlotTable::with_capacity(2);
        table.insert("a").unwrap();
        table.insert("b").unwrap();
        assert!(table.is_full());
        assert_eq!(table.insert("c"), Err("c"));
    }

    #[test]
    fn removed_key_goes_stale() {
        let mut table = SlotTable::with_capacity(1);
        let first = table.insert(1).unwrap();
        assert_eq!(table.remove(first), Some(1));

        let second = table.insert(2).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&2));
        assert_eq!(table.remove(first), None);
    }

    #[test]
    fn tokens_round_trip_with_side() {
        let mut table = SlotTable::with_capacity(8);
        for _ in 0..5 {
            table.insert(()).unwrap();
        }
        let key = table.keys()[4];
        let key = {
            table.remove(key);
            table.insert(()).unwrap()
        };

        assert_eq!(SlotKey::from_token(key.token(Side::Client)), Some((key, Side::Client)));
        assert_eq!(SlotKey::from_token(key.token(Side::Origin)), Some((key, Side::Origin)));
        assert_ne!(key.token(Side::Client), key.token(Side::Origin));
    }

    #[test]
    fn reserved_tokens_do_not_decode() {
        assert_eq!(SlotKey::from_token(LISTENER_TOKEN), None);
        assert_eq!(SlotKey::from_token(WAKER_TOKEN), None);
    }

    #[test]
    fn keys_are_in_index_order() {
        let mut table = SlotTable::with_capacity(4);
        let a = table.insert('a').unwrap();
        let b = table.insert('b').unwrap();
        let c = table.insert('c').unwrap();
        table.remove(b);
        let indices: Vec<_> = table.keys().iter().map(SlotKey::index).collect();
        assert_eq!(indices, vec![a.index(), c.index()]);
        assert_eq!(table.len(), 2);
    }
}
