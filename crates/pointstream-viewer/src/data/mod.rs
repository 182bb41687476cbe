//! Point sources feeding the streaming core.

pub mod las_source;
pub mod synthetic;
