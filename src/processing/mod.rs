pub mod bbox_regression;
pub mod letterbox;
pub mod roi_filter;
pub mod selective_search;
