#![forbid(unsafe_code)]
//! quarry-split: the unit of streamed data and how it travels.
//!
//! - [`Split`]: a columnar batch sharing one `Metadata`, optionally carrying
//!   extracted sort keys with present flags.
//! - [`order`]: the multi-key comparator, in-place split sort and `Rows::min`
//!   for merge-style consumers.
//! - [`frame`] / [`stream`]: self-describing checksummed frames and the
//!   `SplitWriter` / `SplitReader` pair used on executor-to-executor channels.

pub mod error;
pub mod frame;
pub mod order;
pub mod partition;
pub mod split;
pub mod stream;

pub use error::{Result, SplitError};
pub use order::{compare_key, compare_keys, Row, Rows};
pub use partition::hash_partition;
pub use split::Split;
pub use stream::{SplitReader, SplitWriter};
