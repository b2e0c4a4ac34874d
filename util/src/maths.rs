//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into the range `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    if value > max {
        max
    }
    else if value < min {
        min
    }
    else {
        value
    }
}

/// Saturate a value to `[-limit, limit]`.
///
/// Returns the saturated value and whether or not the limit was applied.
pub fn saturate<T>(value: T, limit: T) -> (T, bool)
where
    T: Float
{
    let limit = limit.abs();
    let sat = clamp(value, -limit, limit);

    (sat, sat != value)
}
