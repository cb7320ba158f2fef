//! Core domain types
//!
//! This module contains the core domain structures used across LeadPulse
//! clients. These types represent the fundamental business entities and are
//! shared between the streaming client (which maintains them) and consumers
//! such as the CLI (which render them).

pub mod job;
