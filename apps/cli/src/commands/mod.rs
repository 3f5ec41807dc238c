//! Command implementations for the sftkit CLI.

pub mod sft;
