//! Cursor Module
//!
//! Stateful iteration over every live record in bucket order.
//!
//! ## States
//! ```text
//!   Created ──jump_to_start──▶ Positioned ──advance──▶ Exhausted
//!      │                          │    ▲ │
//!      │                          │    └─┘ advance
//!      └──────────────┬───────────┴──────────────────────┘
//!                     ▼ close / handle closed or dropped
//!                   Closed
//! ```
//!
//! ## Mutation Contract
//! A pass with no `set`/`remove`/`clear` on the handle visits each record
//! exactly once. Any mutation bumps the engine generation; the next cursor
//! call then fails with `CursorInvalidated` until `jump_to_start` resyncs.

mod iter;
mod scan;

use std::sync::Weak;

use parking_lot::Mutex;

pub use iter::{Iter, Keys};
pub use scan::{Scan, ScanItem};

use crate::db::Inner;
use crate::engine::{Engine, Position};
use crate::error::{HashKvError, Result};

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Created,
    Positioned(Position),
    Exhausted,
    Closed,
}

/// Iterator object bound to a database handle
#[derive(Debug)]
pub struct Cursor {
    /// Non-owning back-reference to the handle
    db: Weak<Mutex<Inner>>,
    state: CursorState,
    /// Engine generation observed at `jump_to_start`
    generation: u64,
    /// Records visited this pass; guards against looping chains
    visited: u64,
}

impl Cursor {
    pub(crate) fn new(db: Weak<Mutex<Inner>>) -> Self {
        Self {
            db,
            state: CursorState::Created,
            generation: 0,
            visited: 0,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Position at the first live record; false when the database is empty
    pub fn jump_to_start(&mut self) -> Result<bool> {
        self.with_engine("cursor.jump_to_start", |cursor, engine| cursor.jump(engine))
    }

    /// Move to the next live record; false once exhausted.
    /// Advancing a `Created` cursor behaves like `jump_to_start`.
    pub fn advance(&mut self) -> Result<bool> {
        self.with_engine("cursor.advance", |cursor, engine| match cursor.state {
            CursorState::Created => cursor.jump(engine),
            CursorState::Exhausted => Ok(false),
            CursorState::Closed => Err(HashKvError::Closed),
            CursorState::Positioned(position) => {
                cursor.check_generation(engine)?;
                match engine.next_position(position)? {
                    Some(next) => {
                        cursor.visited += 1;
                        if cursor.visited > engine.max_slots() {
                            return Err(HashKvError::corrupt(
                                "cursor visited more records than the file can hold",
                            ));
                        }
                        cursor.state = CursorState::Positioned(next);
                        Ok(true)
                    }
                    None => {
                        cursor.state = CursorState::Exhausted;
                        Ok(false)
                    }
                }
            }
        })
    }

    /// Key at the current position
    pub fn current_key(&mut self) -> Result<Vec<u8>> {
        self.read_current("cursor.current_key", |engine, offset| engine.read_key(offset))
    }

    /// Value at the current position
    pub fn current_value(&mut self) -> Result<Vec<u8>> {
        self.read_current("cursor.current_value", |engine, offset| {
            engine.read_record(offset).map(|(_, value)| value)
        })
    }

    /// Key and value at the current position, read together
    pub fn current(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.read_current("cursor.current", |engine, offset| engine.read_record(offset))
    }

    /// Give up the cursor; later calls fail with `Closed`
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn jump(&mut self, engine: &mut Engine) -> Result<bool> {
        self.generation = engine.generation();
        match engine.first_position() {
            Some(position) => {
                self.state = CursorState::Positioned(position);
                self.visited = 1;
                Ok(true)
            }
            None => {
                self.state = CursorState::Exhausted;
                self.visited = 0;
                Ok(false)
            }
        }
    }

    fn check_generation(&self, engine: &Engine) -> Result<()> {
        if engine.generation() != self.generation {
            return Err(HashKvError::CursorInvalidated);
        }
        Ok(())
    }

    fn read_current<T>(
        &mut self,
        op: &'static str,
        read: impl FnOnce(&mut Engine, u64) -> Result<T>,
    ) -> Result<T> {
        self.with_engine(op, |cursor, engine| match cursor.state {
            CursorState::Positioned(position) => {
                cursor.check_generation(engine)?;
                read(engine, position.offset)
            }
            CursorState::Closed => Err(HashKvError::Closed),
            CursorState::Created | CursorState::Exhausted => Err(HashKvError::Exhausted),
        })
    }

    /// Run `f` with the handle's engine, recording the outcome on the handle
    fn with_engine<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self, &mut Engine) -> Result<T>,
    ) -> Result<T> {
        if self.state == CursorState::Closed {
            return Err(HashKvError::Closed);
        }
        let Some(shared) = self.db.upgrade() else {
            self.state = CursorState::Closed;
            return Err(HashKvError::Closed);
        };

        let mut inner = shared.lock();
        let result = inner.run(op, |engine| f(self, engine));
        if matches!(result, Err(HashKvError::Closed)) {
            self.state = CursorState::Closed;
        }
        result
    }
}
