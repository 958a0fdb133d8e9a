//! Command implementations for the mongoform CLI

pub mod converge;
pub mod destroy;
pub mod facts;
pub mod validate;
