//! Batch Assembler - fixed-size batches for the scorer
//!
//! One assembler per connection. `push` hands back the full batch exactly
//! when it reaches `capacity` and starts over empty.

use crate::logic::features::RawRecord;

#[derive(Debug)]
pub struct BatchAssembler {
    capacity: usize,
    batch: Vec<RawRecord>,
}

impl BatchAssembler {
    /// `capacity` is validated by the config layer (never 0)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            batch: Vec::with_capacity(capacity),
        }
    }

    /// Append a validated record; returns the batch when it becomes full
    pub fn push(&mut self, record: RawRecord) -> Option<Vec<RawRecord>> {
        self.batch.push(record);

        if self.batch.len() >= self.capacity {
            let full = std::mem::replace(&mut self.batch, Vec::with_capacity(self.capacity));
            Some(full)
        } else {
            None
        }
    }

    /// Take whatever is pending (connection close)
    pub fn take_partial(&mut self) -> Option<Vec<RawRecord>> {
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.batch))
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> RawRecord {
        RawRecord::parse_line(&format!("{},6,192.168.0.1,10.0.0.1,0.005", 100 + i)).unwrap()
    }

    #[test]
    fn test_flush_exactly_at_capacity() {
        let mut assembler = BatchAssembler::new(10);

        for i in 0..9 {
            assert!(assembler.push(record(i)).is_none());
            assert_eq!(assembler.len(), i + 1);
        }

        let batch = assembler.push(record(9)).expect("batch should flush at capacity");
        assert_eq!(batch.len(), 10);
        assert_eq!(assembler.len(), 0);
        assert_eq!(batch[0].packet_size, "100");
        assert_eq!(batch[9].packet_size, "109");
    }

    #[test]
    fn test_repeated_flushes() {
        let mut assembler = BatchAssembler::new(3);
        let flushes = (0..10).filter_map(|i| assembler.push(record(i))).count();
        assert_eq!(flushes, 3);
        assert_eq!(assembler.len(), 1);
    }

    #[test]
    fn test_take_partial() {
        let mut assembler = BatchAssembler::new(10);
        assert!(assembler.take_partial().is_none());

        assembler.push(record(0));
        assembler.push(record(1));
        let partial = assembler.take_partial().unwrap();
        assert_eq!(partial.len(), 2);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut assembler = BatchAssembler::new(0);
        assert_eq!(assembler.capacity(), 1);
        assert!(assembler.push(record(0)).is_some());
    }
}
