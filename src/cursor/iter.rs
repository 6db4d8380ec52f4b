//! Lazy scan iterators
//!
//! Pull-based wrappers over a `Cursor`. A failure mid-scan is yielded as
//! an `Err` item and ends the iteration; it is never dropped silently.

use std::iter::FusedIterator;

use crate::error::Result;

use super::Cursor;

/// One pass of a cursor, shared by `Iter` and `Keys`
#[derive(Debug)]
struct Pass {
    cursor: Cursor,
    started: bool,
    finished: bool,
}

impl Pass {
    fn new(cursor: Cursor) -> Self {
        Self {
            cursor,
            started: false,
            finished: false,
        }
    }

    fn next_with<T>(&mut self, read: impl FnOnce(&mut Cursor) -> Result<T>) -> Option<Result<T>> {
        if self.finished {
            return None;
        }

        let moved = if self.started {
            self.cursor.advance()
        } else {
            self.started = true;
            self.cursor.jump_to_start()
        };

        let item = match moved {
            Ok(true) => read(&mut self.cursor),
            Ok(false) => {
                self.finished = true;
                return None;
            }
            Err(e) => Err(e),
        };

        if item.is_err() {
            self.finished = true;
        }
        Some(item)
    }
}

/// Iterator over `(key, value)` pairs in bucket order
#[derive(Debug)]
pub struct Iter {
    pass: Pass,
}

impl Iter {
    pub(crate) fn new(cursor: Cursor) -> Self {
        Self {
            pass: Pass::new(cursor),
        }
    }
}

impl Iterator for Iter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pass.next_with(Cursor::current)
    }
}

impl FusedIterator for Iter {}

/// Iterator over keys only
#[derive(Debug)]
pub struct Keys {
    pass: Pass,
}

impl Keys {
    pub(crate) fn new(cursor: Cursor) -> Self {
        Self {
            pass: Pass::new(cursor),
        }
    }
}

impl Iterator for Keys {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pass.next_with(Cursor::current_key)
    }
}

impl FusedIterator for Keys {}
