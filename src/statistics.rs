use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// The type of information passed to the statistics
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    Accepted(usize),
    Rejected(usize),
    Completed(usize),
    Failed(usize),
    ReceivedBytes(usize),
}

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Server wide counters
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts<T> {
    pub accepted: T,
    pub rejected: T,
    pub completed: T,
    pub failed: T,
    pub received_bytes: T,
}

impl<T: Number> Counts<T> {
    /// # Example
    ///
    /// ```
    /// use ingest_server::statistics::*;
    ///
    /// let counts = Counts::<Count>::default();
    ///
    /// counts.add(&Stats::Accepted(1));
    /// assert_eq!(counts.accepted.get(), 1);
    ///
    /// counts.add(&Stats::ReceivedBytes(1024));
    /// assert_eq!(counts.received_bytes.get(), 1024);
    /// ```
    pub fn add(&self, payload: &Stats) {
        match payload {
            Stats::Accepted(v) => self.accepted.add(*v),
            Stats::Rejected(v) => self.rejected.add(*v),
            Stats::Completed(v) => self.completed.add(*v),
            Stats::Failed(v) => self.failed.add(*v),
            Stats::ReceivedBytes(v) => self.received_bytes.add(*v),
        }
    }
}

/// server statistics
///
/// Cheap to clone, every clone reports into the same counters.
#[derive(Default, Clone)]
pub struct Statistics(Arc<Counts<Count>>);

impl Statistics {
    pub fn send(&self, reports: &[Stats]) {
        for item in reports {
            self.0.add(item);
        }
    }

    /// Take a snapshot of the counters.
    ///
    /// # Example
    ///
    /// ```
    /// use ingest_server::statistics::*;
    ///
    /// let statistics = Statistics::default();
    /// statistics.clone().send(&[Stats::Completed(1), Stats::ReceivedBytes(11)]);
    ///
    /// let counts = statistics.get();
    /// assert_eq!(counts.completed, 1);
    /// assert_eq!(counts.received_bytes, 11);
    /// assert_eq!(counts.failed, 0);
    /// ```
    pub fn get(&self) -> Counts<usize> {
        Counts {
            accepted: self.0.accepted.get(),
            rejected: self.0.rejected.get(),
            completed: self.0.completed.get(),
            failed: self.0.failed.get(),
            received_bytes: self.0.received_bytes.get(),
        }
    }
}
