pub mod classification;
pub mod models;
