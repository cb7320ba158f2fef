//! LeadPulse Core
//!
//! Core types and abstractions for the LeadPulse lead-analysis platform.
//!
//! This crate contains:
//! - Domain types: Core business entities (JobProgress, JobStatus, etc.)
//! - DTOs: Wire formats for the progress stream and the analyses REST API

pub mod domain;
pub mod dto;
