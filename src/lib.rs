// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Userland Runtime
//!
//! OS-level primitives for applications running directly on the Rustux
//! capability kernel: threads, critical sections, mutexes, condition
//! variables, events and barriers, plus the address-space bookkeeping that
//! thread stacks need.
//!
//! # Layout
//!
//! - [`svc`]: the kernel capability the runtime is built on
//! - [`os`]: the primitives
//! - [`init`]: the process-wide [`Runtime`] and its bootstrap
//! - [`err`] / [`diag`]: result codes and the abort path
//!
//! # Features
//!
//! - `host` (default): std build with the host kernel simulation
//! - `log` / `logging` (default): lifecycle logging through the `log` facade
//!
//! Without `host` the crate is `no_std` and targets aarch64.

#![cfg_attr(not(feature = "host"), no_std)]

extern crate alloc;

mod debug;

pub mod diag;
pub mod err;
pub mod init;
pub mod os;
pub mod svc;

#[cfg(test)]
mod tests;

// Re-exports
pub use err::{Error, Result, ResultCode};
pub use init::{Runtime, RuntimeConfig};
pub use svc::{Handle, Svc};
