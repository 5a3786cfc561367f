pub mod attributes;
pub mod filler;
