pub mod api;
pub mod catalog;
pub mod inference;
pub mod job;
