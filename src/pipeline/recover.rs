//! Pull stream with push-back.
//!
//! Both the segment builder and the window grouper read one item too far
//! before they know where a group ends. [`Recoverable`] lets them hand such
//! items back so the next `get()` replays them before advancing the source.

/// An iterator wrapper supporting single-item and batch recovery.
///
/// Recovered items form a stack: the most recently recovered item is the next
/// one returned. Use [`Recoverable::recover_all`] to hand back a run of items
/// in their original order.
pub struct Recoverable<I: Iterator> {
    inner: I,
    pending: Vec<I::Item>,
}

impl<I: Iterator> Recoverable<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    /// Next recovered item, else the next item of the source.
    pub fn get(&mut self) -> Option<I::Item> {
        self.pending.pop().or_else(|| self.inner.next())
    }

    /// Push one item back; it is returned by the next `get()`.
    pub fn recover(&mut self, item: I::Item) {
        self.pending.push(item);
    }

    /// Push a run back so that it replays in its original order.
    pub fn recover_all(&mut self, items: Vec<I::Item>) {
        self.pending.extend(items.into_iter().rev());
    }

    /// Number of items waiting to be replayed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<I: Iterator> Iterator for Recoverable<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_before_advancing() {
        let mut s = Recoverable::new(1..=3);
        assert_eq!(s.get(), Some(1));
        s.recover(1);
        assert_eq!(s.get(), Some(1));
        assert_eq!(s.get(), Some(2));
    }

    #[test]
    fn single_recovers_are_lifo() {
        let mut s = Recoverable::new(std::iter::empty::<u8>());
        s.recover(2);
        s.recover(1);
        assert_eq!(s.pending(), 2);
        assert_eq!(s.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn batch_recover_keeps_order() {
        let mut s = Recoverable::new(10..12);
        s.recover(9);
        s.recover_all(vec![6, 7, 8]);
        assert_eq!(s.collect::<Vec<_>>(), vec![6, 7, 8, 9, 10, 11]);
    }
}
