//! Directive subdomain
//!
//! Pure construction of the text handed to each agent turn.

pub mod builder;
