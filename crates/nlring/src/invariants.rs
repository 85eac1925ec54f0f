//! Debug assertion macros for ring layout and cursor invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is zero
//! overhead in release builds.

// =============================================================================
// Frame index range
// =============================================================================

/// Assert that a frame index lies within the ring.
///
/// **Invariant**: `position ≤ frame_max`
///
/// Used in: `RingGeometry::frame_offset()`
macro_rules! debug_assert_frame_in_range {
    ($position:expr, $frame_max:expr) => {
        debug_assert!(
            $position <= $frame_max,
            "frame index {} outside ring [0, {}]",
            $position,
            $frame_max
        )
    };
}

// =============================================================================
// Cursor range
// =============================================================================

/// Assert that the cursor stayed within the ring after a transition.
///
/// **Invariant**: `head ∈ [0, frame_max]`
///
/// Used in: `RingDescriptor::advance()`
macro_rules! debug_assert_head_in_range {
    ($head:expr, $frame_max:expr) => {
        debug_assert!(
            $head <= $frame_max,
            "cursor {} escaped ring [0, {}]",
            $head,
            $frame_max
        )
    };
}

// =============================================================================
// Mapping layout
// =============================================================================

/// Assert that the per-direction lengths tile the mapping exactly.
///
/// **Invariant**: `rx_len + tx_len == mapping_len`
///
/// Used in: `RingManager::map()` after installing bases, `RingManager::unmap()`
/// before releasing the region
macro_rules! debug_assert_mapping_covered {
    ($rx_len:expr, $tx_len:expr, $mapping_len:expr) => {
        debug_assert!(
            $rx_len + $tx_len == $mapping_len,
            "ring lengths rx {} + tx {} do not cover mapping of {} bytes",
            $rx_len,
            $tx_len,
            $mapping_len
        )
    };
}

/// Assert that a direction's base address is where the layout puts it.
///
/// **Invariant**: the lowest ring base is the mapping base
///
/// Used in: `RingManager::unmap()`
macro_rules! debug_assert_base_at {
    ($direction:expr, $base:expr, $expected:expr) => {
        debug_assert!(
            $base == $expected,
            "{} ring base {:p} is not at expected {:p}",
            $direction,
            $base,
            $expected
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_base_at;
pub(crate) use debug_assert_frame_in_range;
pub(crate) use debug_assert_head_in_range;
pub(crate) use debug_assert_mapping_covered;
