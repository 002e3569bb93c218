//! The algorithms that make a flat object store behave like a filesystem.

pub mod checksum;
pub mod listing;
pub mod path;
pub mod progress;
pub mod seekable;
pub mod status;

pub use checksum::ChecksumStrategy;
pub use listing::{EntrySource, LocatedStatusLister, PagedListing, PathFilter, SingleEntry};
pub use progress::{ProgressCallback, ProgressRelay};
pub use seekable::SeekableObjectReader;
