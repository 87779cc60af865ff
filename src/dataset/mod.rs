pub mod cache;
pub mod imdb;
