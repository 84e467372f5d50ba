//! Bounded row queues between step copies.
//!
//! A queue is a `tokio::sync::mpsc` bounded channel driven through its
//! blocking API, since every step copy runs on a blocking worker thread.
//! Dropping (or [closing](RowProducer::close)) the producer marks end of
//! stream: the consumer drains what is buffered and then sees `None`.

use std::future::poll_fn;
use std::task::Poll;

use rowflow_types::Row;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Default number of rows a queue buffers before `put` blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// The consumer side of a queue is gone; the row was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("row queue closed by consumer")]
pub struct QueueClosed;

/// Create a queue holding at most `capacity` rows.
///
/// # Panics
///
/// Panics if `capacity` is zero. Pipeline validation rejects that before any
/// queue is built.
#[must_use]
pub fn row_queue(capacity: usize) -> (RowProducer, RowConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (RowProducer { tx }, RowConsumer { rx })
}

/// Writing end of a row queue, owned by exactly one producer copy.
#[derive(Debug)]
pub struct RowProducer {
    tx: mpsc::Sender<Row>,
}

impl RowProducer {
    /// Enqueue `row`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the consumer has been dropped.
    pub fn put(&self, row: Row) -> Result<(), QueueClosed> {
        self.tx.blocking_send(row).map_err(|_| QueueClosed)
    }

    /// Rows currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Signal that no more rows will be produced.
    pub fn close(self) {
        drop(self);
    }
}

/// Reading end of a row queue, owned by exactly one consumer copy.
#[derive(Debug)]
pub struct RowConsumer {
    rx: mpsc::Receiver<Row>,
}

impl RowConsumer {
    /// Next row, blocking while the queue is empty and open.
    /// Returns `None` once the queue is empty and closed.
    pub fn get(&mut self) -> Option<Row> {
        self.rx.blocking_recv()
    }

    /// Next row if one is buffered right now.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when nothing is buffered yet,
    /// [`TryRecvError::Disconnected`] once the queue is empty and closed.
    pub fn try_get(&mut self) -> Result<Row, TryRecvError> {
        self.rx.try_recv()
    }

    /// Rows currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn poll_get(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Option<Row>> {
        self.rx.poll_recv(cx)
    }
}

/// All input queues of one step copy.
///
/// Rows are taken round-robin from whichever queues have data. There is no
/// ordering across queues; each queue stays FIFO.
#[derive(Debug, Default)]
pub struct InputSet {
    queues: Vec<RowConsumer>,
    next: usize,
}

impl InputSet {
    #[must_use]
    pub fn new(queues: Vec<RowConsumer>) -> Self {
        Self { queues, next: 0 }
    }

    /// Open queues left to read.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.queues.len()
    }

    /// Next row from any input. Returns `None` once every input is drained
    /// and closed.
    pub fn next_row(&mut self) -> Option<Row> {
        loop {
            match self.queues.len() {
                0 => return None,
                1 => {
                    let row = self.queues[0].get();
                    if row.is_none() {
                        self.queues.clear();
                    }
                    return row;
                }
                _ => {}
            }

            if let Some(row) = self.try_any() {
                return Some(row);
            }
            if self.queues.is_empty() {
                return None;
            }

            // Nothing buffered anywhere: park until one queue delivers or closes.
            let queues = &mut self.queues;
            let (idx, row) = futures::executor::block_on(poll_fn(|cx| {
                for (i, queue) in queues.iter_mut().enumerate() {
                    if let Poll::Ready(row) = queue.poll_get(cx) {
                        return Poll::Ready((i, row));
                    }
                }
                Poll::Pending
            }));
            match row {
                Some(row) => {
                    self.next = (idx + 1) % self.queues.len();
                    return Some(row);
                }
                None => {
                    self.queues.swap_remove(idx);
                    self.next = 0;
                }
            }
        }
    }

    /// One non-blocking round-robin pass, dropping closed queues on the way.
    fn try_any(&mut self) -> Option<Row> {
        let mut tried = 0;
        while tried < self.queues.len() {
            let idx = self.next % self.queues.len();
            match self.queues[idx].try_get() {
                Ok(row) => {
                    self.next = (idx + 1) % self.queues.len();
                    return Some(row);
                }
                Err(TryRecvError::Empty) => {
                    self.next = idx + 1;
                    tried += 1;
                }
                Err(TryRecvError::Disconnected) => {
                    self.queues.remove(idx);
                    if self.queues.is_empty() {
                        return None;
                    }
                    self.next = idx;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::{FieldMeta, RowSchema, SchemaRef, Value, ValueType};

    fn schema() -> SchemaRef {
        RowSchema::new(vec![FieldMeta::new("n", ValueType::Integer)]).into_ref()
    }

    fn row(schema: &SchemaRef, n: i64) -> Row {
        Row::new(schema.clone(), vec![Value::Integer(n)])
    }

    #[test]
    fn get_returns_none_after_close_and_drain() {
        let s = schema();
        let (tx, mut rx) = row_queue(4);
        tx.put(row(&s, 1)).unwrap();
        tx.put(row(&s, 2)).unwrap();
        assert_eq!(tx.len(), 2);
        tx.close();
        assert_eq!(rx.get().unwrap().value(0), &Value::Integer(1));
        assert_eq!(rx.get().unwrap().value(0), &Value::Integer(2));
        assert!(rx.get().is_none());
        assert!(rx.get().is_none());
    }

    #[test]
    fn put_fails_when_consumer_dropped() {
        let s = schema();
        let (tx, rx) = row_queue(1);
        drop(rx);
        assert_eq!(tx.put(row(&s, 1)), Err(QueueClosed));
    }

    #[test]
    fn full_queue_blocks_producer_until_get() {
        let s = schema();
        let (tx, mut rx) = row_queue(1);
        tx.put(row(&s, 0)).unwrap();
        let producer = std::thread::spawn(move || {
            tx.put(row(&s, 1)).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(rx.get().unwrap().value(0), &Value::Integer(0));
        producer.join().unwrap();
        assert_eq!(rx.get().unwrap().value(0), &Value::Integer(1));
        assert!(rx.get().is_none());
    }

    #[test]
    fn input_set_merges_all_queues_until_closed() {
        let s = schema();
        let (tx_a, rx_a) = row_queue(8);
        let (tx_b, rx_b) = row_queue(8);
        let mut inputs = InputSet::new(vec![rx_a, rx_b]);

        let s_a = s.clone();
        let a = std::thread::spawn(move || {
            for n in 0..50 {
                tx_a.put(row(&s_a, n)).unwrap();
            }
        });
        let b = std::thread::spawn(move || {
            for n in 100..150 {
                tx_b.put(row(&s, n)).unwrap();
            }
        });

        let mut seen = Vec::new();
        while let Some(r) = inputs.next_row() {
            seen.push(r.value(0).as_i64().unwrap());
        }
        a.join().unwrap();
        b.join().unwrap();

        assert_eq!(seen.len(), 100);
        let from_a: Vec<i64> = seen.iter().copied().filter(|n| *n < 100).collect();
        let from_b: Vec<i64> = seen.iter().copied().filter(|n| *n >= 100).collect();
        assert_eq!(from_a, (0..50).collect::<Vec<_>>());
        assert_eq!(from_b, (100..150).collect::<Vec<_>>());
        assert_eq!(inputs.open_count(), 0);
    }

    #[test]
    fn empty_input_set_ends_immediately() {
        let mut inputs = InputSet::default();
        assert!(inputs.next_row().is_none());
    }
}
