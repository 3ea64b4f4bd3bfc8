//! Site-specific search profiles

pub mod justjoin;

pub use justjoin::JustJoin;
