//! Background scan
//!
//! A producer thread advances a cursor and pushes records into a bounded
//! crossbeam channel, so cursor I/O overlaps with the consumer's work.
//! Dropping the `Scan` disconnects the channel; the producer notices on its
//! next send, stops, and releases its cursor before `drop` returns.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::error::Result;

use super::{Cursor, Iter};

/// Item delivered by a scan
pub type ScanItem = Result<(Vec<u8>, Vec<u8>)>;

/// Consumer end of a background scan
#[derive(Debug)]
pub struct Scan {
    receiver: Option<Receiver<ScanItem>>,
    producer: Option<JoinHandle<()>>,
}

impl Scan {
    pub(crate) fn spawn(cursor: Cursor, capacity: usize) -> Result<Self> {
        let (sender, receiver) = channel::bounded(capacity);

        let producer = thread::Builder::new()
            .name("hashkv-scan".to_string())
            .spawn(move || {
                for item in Iter::new(cursor) {
                    if let Err(e) = &item {
                        tracing::warn!(error = %e, "Scan producer stopped on error");
                    }
                    if sender.send(item).is_err() {
                        tracing::debug!("Scan consumer went away, stopping producer");
                        break;
                    }
                }
            })?;

        Ok(Self {
            receiver: Some(receiver),
            producer: Some(producer),
        })
    }
}

impl Iterator for Scan {
    type Item = ScanItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on a full channel wakes up
        self.receiver.take();
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                tracing::error!("Scan producer panicked");
            }
        }
    }
}
