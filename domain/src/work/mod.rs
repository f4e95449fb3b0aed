//! Work decomposition subdomain

pub mod entities;
