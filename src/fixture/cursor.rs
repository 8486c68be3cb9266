//! Bookkeeping containers used by the scope stack.

#![allow(missing_docs)]

// ──────────────────── cursor stack ────────────────────

/// Stack that remembers how far it has been read.
///
/// `read_from_cursor` yields everything pushed since the last read and moves
/// the cursor to the end; `reset` rewinds it so the next read sees the whole
/// stack again.
#[derive(Debug, Clone)]
pub struct CursorStack<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> Default for CursorStack<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
        }
    }
}

impl<T> CursorStack<T> {
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Remove the top item, pulling the cursor back if it pointed past the end.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop()?;
        self.cursor = self.cursor.min(self.items.len());
        Some(item)
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn read_from_cursor(&mut self) -> &[T] {
        let start = self.cursor.min(self.items.len());
        self.cursor = self.items.len();
        &self.items[start..]
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Whether a read would return anything.
    pub fn has_unread(&self) -> bool {
        self.cursor < self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
    }
}

// ──────────────────── segmented list ────────────────────

/// Flat list split into closed segments, each tagged with its owner.
///
/// Items pushed after the last `finish_segment` belong to an open segment that
/// is not reported by [`segments`](Self::segments).
#[derive(Debug, Clone)]
pub struct SegmentedList<T, D> {
    items: Vec<T>,
    ends: Vec<usize>,
    owners: Vec<D>,
}

impl<T, D> Default for SegmentedList<T, D> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            ends: Vec::new(),
            owners: Vec::new(),
        }
    }
}

impl<T, D> SegmentedList<T, D> {
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn finish_segment(&mut self, owner: D) {
        self.ends.push(self.items.len());
        self.owners.push(owner);
    }

    /// Closed segments in order, as `(owner, items)`.
    pub fn segments(&self) -> impl Iterator<Item = (&D, &[T])> {
        let starts = std::iter::once(0).chain(self.ends.iter().copied());
        self.owners
            .iter()
            .zip(starts.zip(self.ends.iter().copied()))
            .map(|(owner, (start, end))| (owner, &self.items[start..end]))
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn segment_count(&self) -> usize {
        self.ends.len()
    }

    pub fn last_owner(&self) -> Option<&D> {
        self.owners.last()
    }

    /// Drop the last closed segment and everything pushed after it.
    pub fn pop_segment(&mut self) -> Option<D> {
        let owner = self.owners.pop()?;
        self.ends.pop();
        let start = self.ends.last().copied().unwrap_or(0);
        self.items.truncate(start);
        Some(owner)
    }

    /// True when no item has been pushed, regardless of segment count.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.ends.clear();
        self.owners.clear();
    }
}
