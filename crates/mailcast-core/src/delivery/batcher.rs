//! Batcher - Splits an ordered subscriber list into fixed-size batches

/// Split `items` into consecutive batches of at most `size` elements
///
/// Order is preserved, every batch except possibly the last is full, and no
/// item appears twice. A size of zero is treated as one.
pub fn make_batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}
