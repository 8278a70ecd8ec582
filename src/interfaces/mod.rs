//! Boundary formats: CSV seed/report files and the JSON-lines op stream.

pub mod csv;
pub mod ops;
