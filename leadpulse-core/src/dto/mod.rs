//! Data Transfer Objects for the LeadPulse API surface
//!
//! This module contains the wire formats exchanged with the LeadPulse
//! backend: the envelope framing of the real-time progress stream and the
//! snapshot bodies returned by the analyses REST endpoints. DTOs are
//! lightweight representations of domain entities optimized for network
//! transfer.

pub mod rest;
pub mod stream;
