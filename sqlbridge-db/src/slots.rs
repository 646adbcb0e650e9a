//! Generational slot table backing every engine handle.
//!
//! # Token Layout
//!
//! ```text
//! bit 63          56 55              32 31                     0
//!    +-------------+------------------+-----------------------+
//!    | kind (u8)   | generation (u24) | slot index (u32)      |
//!    +-------------+------------------+-----------------------+
//! ```
//!
//! `kind` is never zero, so a live token is never `0`. Removing an entry
//! bumps the slot's generation; a token minted before the removal no longer
//! matches and is rejected. A slot whose generation would wrap is retired
//! instead of reused, so no stale token can match again.

use log::debug;

use crate::error::{DbError, DbResult};
use crate::sqlite;

/// Opaque, nonzero handle to an engine resource.
pub type Token = u64;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const KIND_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;

/// Resource kind encoded in the top byte of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Kind {
    Database = 1,
    Session = 2,
    Cursor = 3,
}

impl Kind {
    const fn name(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Session => "connection",
            Self::Cursor => "rows",
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A vector of reusable slots keyed by generational tokens.
pub(crate) struct SlotTable<T> {
    kind: Kind,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> SlotTable<T> {
    pub(crate) const fn new(kind: Kind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value` and returns its token.
    pub(crate) fn insert(&mut self, value: T) -> DbResult<Token> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            let index = u32::try_from(self.slots.len()).map_err(|_| {
                DbError::new(sqlite::SQLITE_TOOBIG, "handle table exhausted")
            })?;
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            index
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        let generation = slot.generation;
        Ok(self.token(index, generation))
    }

    pub(crate) fn get(&self, token: Token) -> DbResult<&T> {
        let index = self.locate(token)?;
        self.slots[index]
            .value
            .as_ref()
            .ok_or_else(|| self.stale(token))
    }

    /// Removes the entry, invalidating `token` and every copy of it.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn remove(&mut self, token: Token) -> DbResult<T> {
        let index = self.locate(token)?;
        let kind = self.kind;
        let slot = &mut self.slots[index];
        let value = slot
            .value
            .take()
            .ok_or_else(|| DbError::stale_handle(kind.name(), token))?;
        if slot.generation == GENERATION_MASK {
            debug!("retiring {} slot {index}", kind.name());
        } else {
            slot.generation += 1;
            self.free.push(index as u32);
        }
        Ok(value)
    }

    /// Number of live entries.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    fn token(&self, index: u32, generation: u32) -> Token {
        (u64::from(self.kind as u8) << KIND_SHIFT)
            | (u64::from(generation) << INDEX_BITS)
            | u64::from(index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn locate(&self, token: Token) -> DbResult<usize> {
        let index = token as u32;
        let generation = (token >> INDEX_BITS) as u32 & GENERATION_MASK;
        let kind = (token >> KIND_SHIFT) as u8;
        if kind != self.kind as u8 {
            return Err(self.stale(token));
        }
        match self.slots.get(index as usize) {
            Some(slot) if slot.generation == generation && slot.value.is_some() => {
                Ok(index as usize)
            }
            _ => Err(self.stale(token)),
        }
    }

    fn stale(&self, token: Token) -> DbError {
        DbError::stale_handle(self.kind.name(), token)
    }
}
