//! starling: a streaming in-memory Vamana vector index.
//!
//! The index keeps a directed proximity graph over high-dimensional
//! vectors in tag-addressed slots and supports three operations that may
//! run concurrently:
//!
//! - **Batch build**: wire an initial set of points in parallel, with one
//!   global prune instead of per-insert back-edge work.
//! - **Point insertion**: greedy search from the frozen entry points,
//!   robust-prune the visited pool, push back-edges, publish the tag last.
//! - **Lazy deletion + consolidation**: deletes only unbind the tag and
//!   mark the slot; one batched consolidation pass later repairs every
//!   affected neighbor list through the 2-hop expansion and recycles the
//!   slots.
//!
//! # Example
//!
//! ```ignore
//! use starling::{IndexParams, Metric, StreamingIndex};
//!
//! let index = StreamingIndex::<f32>::new(Metric::L2, 128, 100_000, IndexParams::default())?;
//! index.build(&batch, 10_000, &tags)?;
//!
//! index.insert_point(&vector, 10_001)?;
//! index.lazy_delete(17)?;
//! index.consolidate_deletes()?;
//!
//! let hits = index.search(&query, 10, 100)?;
//! ```
//!
//! The [`driver`] module adds the checkpointed streaming loop used by the
//! `insert_delete_consolidate` binary: slice-wise loads from a binary
//! vector file, parallel insert checkpoints, an optional concurrent
//! deletion task, and staged snapshots.
//!
//! # References
//!
//! - Subramanya et al. (2019): "DiskANN: Fast Accurate Billion-point
//!   Nearest Neighbor Search on a Single Node"
//! - Singh et al. (2021): "FreshDiskANN: A Fast and Accurate Graph-Based
//!   ANN Index for Streaming Similarity Search"

pub mod distance;
pub mod driver;
pub mod error;
pub mod graph;
pub mod index;
pub mod io;
pub mod store;
pub mod tags;

// Re-exports
pub use distance::{Element, Metric};
pub use error::{IndexError, Result};
pub use index::{ConsolidateReport, IndexParams, IndexStats, StreamingIndex};
