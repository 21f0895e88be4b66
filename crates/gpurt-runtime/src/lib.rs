#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

//! Runtime core for GPU command submission: command containers, indirect
//! heaps, pooled heap allocations and GPU-written completion tags.

extern crate alloc;

#[macro_use]
extern crate derive_new;

mod id;

/// Command container module.
pub mod command;
/// Runtime configuration module.
pub mod config;
/// Memory management module.
pub mod memory_management;
/// Tag pool and completion tracking module.
pub mod pool;

mod device;
pub use device::*;
