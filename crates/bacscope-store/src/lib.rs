//! Point history storage for bacscope.
//!
//! A [`HistoryFrame`] is a table indexed by UTC timestamp with one column per
//! point. Frames are resampled on save, appended to a SQLite `history` table
//! by [`HistoryStore`], and accompanied by a JSON [`Sidecar`] holding device
//! and point metadata.

pub mod error;
pub mod frame;
pub mod sidecar;
pub mod sqlite;

pub use error::StoreError;
pub use frame::{parse_frequency, Aggregation, Column, FrameBuilder, HistoryFrame};
pub use sidecar::{DeviceMeta, PointMeta, Sidecar, SnapshotPaths};
pub use sqlite::HistoryStore;
