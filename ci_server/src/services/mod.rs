//! CI server services: build bookkeeping, GitHub integration and execution.

pub mod build_service;
pub mod executor;
pub mod github_service;
