//! # API Shared
//!
//! Shared utilities and definitions for the PRISM APIs.
//!
//! Contains:
//! - Session tokens and role credentials (`auth`)
//! - Wire request/response types (`dto`)
//! - Shared services like `HealthService`
//!
//! Used by `api-rest` and the `prism` CLI.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{AuthError, RoleCredentials, SessionClaims, SessionConfig, SessionKeys};
pub use health::{HealthRes, HealthService};
