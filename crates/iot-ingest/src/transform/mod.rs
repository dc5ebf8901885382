//! In-memory transform stages: hour alignment, then long-to-wide pivot

pub mod align;
pub mod pivot;

pub use align::{align, floor_hour, hour_grid, AlignMode};
pub use pivot::{column_name, pivot, round2, PivotResult};
