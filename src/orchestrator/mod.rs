//! Session orchestration.
//!
//! Covers the in-memory session store, backend event-stream processing,
//! the plan and question workflows, container reuse, and status fan-out.

pub mod broadcast;
pub mod clone_reuse;
pub mod heuristics;
pub mod plan_workflow;
pub mod question_workflow;
pub mod service;
pub mod session_store;
pub mod stream_processor;

pub use service::{NewSessionOptions, ResumeSessionOptions, SessionOrchestrator};
