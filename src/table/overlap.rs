//! Overlap compression for ordered statement histories.
//!
//! When a new statement list starts with the tail of what already ran, only
//! the part past that shared run needs to be issued. The match is the longest
//! suffix of the history that equals a prefix of the incoming list; a pattern
//! that repeats non-contiguously (`[A, B, A]` vs `[B, A, C]`) is matched only
//! as far as that rule allows.

#![allow(missing_docs)]

/// Length of the longest suffix of `tail` equal to a prefix of `head`.
pub fn overlap_len_by<T, F>(tail: &[T], head: &[T], mut eq: F) -> usize
where
    F: FnMut(&T, &T) -> bool,
{
    if tail.is_empty() || head.is_empty() {
        return 0;
    }
    let first = tail.len().saturating_sub(head.len());
    for start in first..tail.len() {
        let suffix = &tail[start..];
        if suffix.iter().zip(head).all(|(a, b)| eq(a, b)) {
            return suffix.len();
        }
    }
    0
}

pub fn overlap_len<T: PartialEq>(tail: &[T], head: &[T]) -> usize {
    overlap_len_by(tail, head, |a, b| a == b)
}

/// Elements of `incoming` not already covered by the end of `history`.
pub fn unconsumed_by<'a, T, F>(history: &[T], incoming: &'a [T], eq: F) -> &'a [T]
where
    F: FnMut(&T, &T) -> bool,
{
    &incoming[overlap_len_by(history, incoming, eq)..]
}

/// Append `incoming` to `history`, skipping the overlapping run.
pub fn append_compressed_by<T, F>(history: &mut Vec<T>, incoming: &[T], eq: F)
where
    T: Clone,
    F: FnMut(&T, &T) -> bool,
{
    let skip = overlap_len_by(history, incoming, eq);
    history.extend_from_slice(&incoming[skip..]);
}
