//! Sector chain resolution and allocation
//!
//! Two allocators share the file:
//! - Normal chains of full sectors, linked through the FAT
//! - Mini chains of 64-byte sectors inside the ministream, linked through
//!   the MiniFAT
//!
//! Streams below the header's mini cutoff use mini chains, everything else
//! normal chains. The FAT itself is located through the header's inline
//! DIFAT array and, past 109 FAT sectors, the DIFAT chain.

pub mod fat;
pub mod mini;
pub mod resolver;

use crate::error::{CompoundError, Result};
use tracing::warn;

/// Where the next-pointers of a chain live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    /// Linked through the last slot of each DIFAT sector
    Difat,
    /// The FAT sectors themselves, listed by the DIFAT
    Fat,
    /// Linked through the FAT
    Normal,
    /// Linked through the MiniFAT, data in the ministream
    Mini,
}

/// Raise a corruption error, or log and carry on when loading leniently
pub(crate) fn corruption(lenient: bool, message: String) -> Result<()> {
    if lenient {
        warn!("Ignoring corruption: {}", message);
        Ok(())
    } else {
        Err(CompoundError::Corrupted(message))
    }
}
