/// Default number of connections the server serves at the same time.
pub const MAX_CLIENTS: usize = 30;

/// Bit Flag
#[derive(PartialEq, Eq)]
enum Bit {
    Low,
    High,
}

/// Returned by [`SlotTable::allocate`] when every slot is taken.
///
/// The rejected entry is handed back so that the caller can decide what to do
/// with it, usually closing the socket it owns.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Full")
    }
}

impl<T> std::fmt::Display for Full<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("connection slot table is full")
    }
}

impl<T> std::error::Error for Full<T> {}

/// Connection slot table
///
/// A fixed capacity arena of connections. The capacity is decided once at
/// construction and the table never grows. Occupancy is tracked in a bitmap
/// of 64 bit buckets, the highest bit of the first bucket is slot 0, so
/// finding the lowest free slot is a `leading_ones` per bucket.
///
/// # Test
///
/// ```
/// use ingest_server::slots::*;
///
/// let mut table = SlotTable::new(2);
///
/// assert_eq!(table.allocate("a").ok(), Some(0));
/// assert_eq!(table.allocate("b").ok(), Some(1));
/// assert_eq!(table.allocate("c").map_err(Full::into_inner).err(), Some("c"));
///
/// assert_eq!(table.release(0), Some("a"));
/// assert_eq!(table.allocate("d").ok(), Some(0));
/// ```
pub struct SlotTable<T> {
    entries: Vec<Option<T>>,
    buckets: Vec<u64>,
    allocated: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new(MAX_CLIENTS)
    }
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            buckets: vec![0; capacity.div_ceil(64)],
            allocated: 0,
        }
    }

    /// get table capacity.
    ///
    /// ```
    /// use ingest_server::slots::*;
    ///
    /// assert_eq!(SlotTable::<()>::default().capacity(), MAX_CLIENTS);
    /// ```
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// get the number of occupied slots.
    pub fn len(&self) -> usize {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    pub fn is_full(&self) -> bool {
        self.allocated == self.capacity()
    }

    /// Claim the lowest free slot for the entry.
    pub fn allocate(&mut self, entry: T) -> Result<usize, Full<T>> {
        let Some(index) = self.first_free() else {
            return Err(Full(entry));
        };

        self.set_bit(index, Bit::High);
        self.entries[index] = Some(entry);
        self.allocated += 1;

        Ok(index)
    }

    /// Free the slot and hand back its entry.
    ///
    /// Releasing a free slot, or an index outside the table, does nothing.
    ///
    /// ```
    /// use ingest_server::slots::*;
    ///
    /// let mut table = SlotTable::new(4);
    /// table.allocate(1).unwrap();
    ///
    /// assert_eq!(table.release(3), None);
    /// assert_eq!(table.release(100), None);
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn release(&mut self, index: usize) -> Option<T> {
        if !self.is_occupied(index) {
            return None;
        }

        self.set_bit(index, Bit::Low);
        self.allocated -= 1;
        self.entries[index].take()
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        index < self.capacity() && self.buckets[index / 64] & Self::mask(index) != 0
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)?.as_mut()
    }

    /// Occupied slots in table order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|entry| (index, entry)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_mut().map(|entry| (index, entry)))
    }

    fn first_free(&self) -> Option<usize> {
        self.buckets
            .iter()
            .enumerate()
            .find_map(|(offset, bucket)| {
                if *bucket == u64::MAX {
                    return None;
                }

                // The last bucket can be partially used, the bits past the
                // capacity are never set so they must be skipped here.
                let index = offset * 64 + bucket.leading_ones() as usize;
                (index < self.capacity()).then_some(index)
            })
    }

    fn mask(index: usize) -> u64 {
        1 << (63 - (index % 64))
    }

    fn set_bit(&mut self, index: usize, bit: Bit) {
        let mask = Self::mask(index);
        let bucket = &mut self.buckets[index / 64];

        *bucket = match bit {
            Bit::High => *bucket | mask,
            Bit::Low => *bucket & !mask,
        };
    }
}
