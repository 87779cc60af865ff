pub mod cntk_export;
pub mod roi_generation;
