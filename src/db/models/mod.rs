pub mod column;

pub use column::{Column, ColumnData, TIME_COLUMN};
