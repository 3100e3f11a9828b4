//! OAuth 2.0 implementation
//!
//! Implements:
//! - RFC 6749 Authorization Code, password and refresh token grants
//! - RFC 7636 PKCE on the authorization code grant
//! - RFC 8414 Authorization Server Metadata

pub mod authorize;
pub mod metadata;
pub mod token;
