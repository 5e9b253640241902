//! Identifier increment strategies.

use crate::{RegisterError, Result};

/// Next identifier for kinds that grow in both directions.
///
/// The positive and negative halves are kept balanced: the positive side grows
/// (`max + 1`) while it is not longer than the negative side, otherwise the
/// negative side grows (`min - 1`). With only the reserved record at `1`, the
/// next identifier is `-1`, then `2`, then `-2`, and so on.
///
/// # Errors
///
/// [`RegisterError::IdSpaceExhausted`] when the chosen side would overflow.
pub fn next_balanced_id(kind: &'static str, min: i32, max: i32) -> Result<i32> {
    let negative = i64::from(min.min(0));
    let positive = i64::from(max.max(0));

    let next = if positive > -negative {
        min.min(0).checked_sub(1)
    } else {
        max.max(0).checked_add(1)
    };
    next.ok_or(RegisterError::IdSpaceExhausted { kind, min, max })
}

/// Next identifier for kinds that only grow upwards (`max + 1`).
///
/// # Errors
///
/// [`RegisterError::IdSpaceExhausted`] when `max` is `i32::MAX`.
pub fn next_sequential_id(kind: &'static str, min: i32, max: i32) -> Result<i32> {
    max.max(0)
        .checked_add(1)
        .ok_or(RegisterError::IdSpaceExhausted { kind, min, max })
}
