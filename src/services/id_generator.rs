//! Time-ordered 63-bit upload ids.
//!
//! Layout (most significant first): 41 bits of milliseconds since
//! [`EPOCH_MILLIS`], 10 bits of worker id, 12 bits of per-millisecond sequence.
//! The sign bit is always zero so ids fit an SQLite `INTEGER` and a JSON number.

use chrono::Utc;
use std::sync::Mutex;

/// 2021-01-01T00:00:00Z.
pub const EPOCH_MILLIS: i64 = 1_609_459_200_000;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = WORKER_BITS + SEQUENCE_BITS;

#[derive(Debug)]
struct GeneratorState {
    last_millis: i64,
    sequence: i64,
}

/// Process-wide id generator; share it behind an `Arc`.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id & MAX_WORKER_ID),
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A clock that steps backwards keeps issuing from the last seen millisecond.
        let mut millis = current_millis().max(state.last_millis);
        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while millis <= state.last_millis {
                    std::hint::spin_loop();
                    millis = current_millis().max(state.last_millis + 1);
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;

        ((millis - EPOCH_MILLIS) << TIMESTAMP_SHIFT)
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn ids_are_positive_and_increasing() {
        let generator = IdGenerator::new(3);
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn worker_id_is_embedded() {
        let generator = IdGenerator::new(7);
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_WORKER_ID), 7);
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let generator = Arc::new(IdGenerator::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
