//! Error types shared across the crate

use derive_more::Display;

/// A structural precondition was violated by a direct tree operation
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum TreeError {
    /// The index does not address an existing child slot
    #[display(fmt = "index {} is out of range for a node with {} children", index, len)]
    IndexOutOfRange {
        /// The index that was requested
        index: usize,
        /// The number of children at the time of the call
        len: usize,
    },
}

impl std::error::Error for TreeError {}

/// Marker error for a load that stopped because cancellation was requested
///
/// Loaders may propagate it with `?` (see
/// [`ProgressFanout::ensure_not_cancelled`](crate::load::ProgressFanout::ensure_not_cancelled));
/// the task then finishes as `Cancelled` rather than `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[display(fmt = "load cancelled")]
pub struct Cancelled;

impl std::error::Error for Cancelled {}
