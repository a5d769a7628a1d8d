use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::contract::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    pub chunk_id: usize,
    pub start_index: usize,
    pub end_index_exclusive: usize,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.end_index_exclusive - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.start_index..self.end_index_exclusive
    }
}

/// Splits `total` items into at most `branching_factor` contiguous chunks of
/// `ceil(total / min(branching_factor, total))` items. The trailing chunk may
/// be shorter; chunks that would be empty are not emitted.
pub fn plan_partitions(
    total: usize,
    branching_factor: usize,
) -> Result<Vec<Partition>, ValidationError> {
    if branching_factor == 0 {
        return Err(ValidationError::new(
            "branching_factor must be a positive integer",
        ));
    }
    if total == 0 {
        return Err(ValidationError::new("No targets to partition"));
    }

    let branch_count = branching_factor.min(total);
    let chunk_size = total.div_ceil(branch_count);
    let partitions = fixed_size_partitions(total, chunk_size);

    if partitions.len() > branching_factor {
        return Err(ValidationError::new(format!(
            "Computed chunk count {} exceeds branching_factor={branching_factor}",
            partitions.len()
        )));
    }
    validate_partitions(total, &partitions)?;
    Ok(partitions)
}

/// Splits `total` items into admission windows of `per_window` items, or a
/// single window when admission control is off.
pub fn plan_windows(
    total: usize,
    per_window: Option<usize>,
) -> Result<Vec<Partition>, ValidationError> {
    if total == 0 {
        return Err(ValidationError::new("No targets to partition"));
    }

    let chunk_size = match per_window {
        Some(0) => {
            return Err(ValidationError::new(
                "per_window must be a positive integer",
            ));
        }
        Some(size) => size,
        None => total,
    };

    let partitions = fixed_size_partitions(total, chunk_size);
    validate_partitions(total, &partitions)?;
    Ok(partitions)
}

fn fixed_size_partitions(total: usize, chunk_size: usize) -> Vec<Partition> {
    (0..total)
        .step_by(chunk_size)
        .enumerate()
        .map(|(chunk_id, start_index)| Partition {
            chunk_id,
            start_index,
            end_index_exclusive: (start_index + chunk_size).min(total),
        })
        .collect()
}

fn validate_partitions(total: usize, partitions: &[Partition]) -> Result<(), ValidationError> {
    if partitions.is_empty() {
        return Err(ValidationError::new("No targets to partition"));
    }

    if partitions[0].start_index != 0
        || partitions[partitions.len() - 1].end_index_exclusive != total
    {
        return Err(ValidationError::new(
            "Chunk boundaries do not cover the full batch",
        ));
    }

    for idx in 1..partitions.len() {
        if partitions[idx - 1].end_index_exclusive != partitions[idx].start_index {
            return Err(ValidationError::new(
                "Chunk boundaries overlap or leave gaps",
            ));
        }
    }

    if partitions.iter().any(Partition::is_empty) {
        return Err(ValidationError::new("Chunk plan contains an empty chunk"));
    }

    Ok(())
}
