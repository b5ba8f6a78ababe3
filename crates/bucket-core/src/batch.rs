//! Batch planning for reduction-tree merges.
//!
//! When there are too many inputs to merge in one step, inputs are split into
//! batches, each batch is merged into an intermediate output, and the
//! intermediates are merged again until one step suffices.

/// Split `items` into consecutive batches of at most `size` items.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Batch size balancing the number of batches against their width.
pub fn auto_batch_size(inputs: usize) -> usize {
    let mut root = 1;
    while root * root < inputs {
        root += 1;
    }
    root.max(2)
}

/// Number of batch levels needed before `inputs` fit into one merge of at
/// most `width` inputs, when a level of `n` inputs is cut into batches of
/// `size(n)`.
pub fn levels(mut inputs: usize, width: usize, size: impl Fn(usize) -> usize) -> usize {
    let width = width.max(1);
    let mut levels = 0;
    while inputs > width {
        inputs = inputs.div_ceil(size(inputs).max(2));
        levels += 1;
    }
    levels
}
