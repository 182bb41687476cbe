pub mod display;
pub mod point_raster;
