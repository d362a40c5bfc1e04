//! CI server data models.

pub mod build;
