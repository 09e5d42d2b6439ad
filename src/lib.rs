//! # aligned-alloc - Aligned Data Allocator for Array Hosts
//!
//! This crate provides a memory allocator that hands out blocks whose start
//! address is a multiple of a fixed alignment (64 bytes by default, one cache
//! line or one AVX-512 vector), and a policy binding that installs it as the
//! data allocator of a host array library such as NumPy.
//!
//! ## Overview
//!
//! ```text
//!   Control flow:
//!
//!   ┌────────┐ enable()/disable() ┌───────────────┐ set_handler ┌──────────┐
//!   │ caller │───────────────────►│ PolicyBinding │────────────►│   Host   │
//!   └────────┘                    └───────────────┘             └────┬─────┘
//!                                                                    │ malloc/calloc/
//!                                                                    │ realloc/free
//!                                                                    ▼
//!                                 ┌───────────────┐   malloc    ┌──────────┐
//!                                 │   RawAlloc    │◄────────────│ Aligned  │
//!                                 │ (libc heap)   │    free     │Allocator │
//!                                 └───────────────┘             └──────────┘
//! ```
//!
//! The engine never calls into the binding and the binding never allocates;
//! it only swaps handler tables.
//!
//! ## Crate Structure
//!
//! ```text
//!   aligned_alloc
//!   ├── align      - Power-of-two arithmetic (align_to!, checked helpers)
//!   ├── header     - Per-block header stored before each aligned pointer
//!   ├── raw        - RawAlloc trait, LibcAlloc, CountingAlloc
//!   ├── config     - AllocatorConfig
//!   ├── error      - Error and Result
//!   ├── aligned    - AlignedAllocator (malloc, calloc, realloc, free)
//!   ├── handler    - C-compatible handler tables for the host
//!   ├── host       - Host trait, LocalHost, HostBuffer
//!   └── policy     - PolicyBinding, enable, disable, is_active
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use aligned_alloc::{AlignedAllocator, Host, LocalHost};
//!
//! let alloc = AlignedAllocator::libc();
//! let p = alloc.malloc(1000).unwrap();
//! assert_eq!(p.as_ptr() as usize % 64, 0);
//! unsafe { alloc.free(p.as_ptr()) };
//!
//! let host = LocalHost::global();
//! aligned_alloc::enable().unwrap();
//! let buf = host.alloc_buffer(1000).unwrap();
//! aligned_alloc::disable().unwrap();
//! assert_eq!(buf.as_ptr() as usize % 64, 0);
//! drop(buf); // still freed by the aligned handler
//! ```
//!
//! ## How It Works
//!
//! Each request is padded so that a header and the worst-case alignment
//! slack fit in front of the payload:
//!
//! ```text
//!   padded = size + HEADER_SIZE + (alignment - 1)
//!
//!   raw                             aligned (multiple of alignment)
//!   │                               │
//!   ▼                               ▼
//!   ┌─────────────┬────────────────┬──────────────────────────┬───────┐
//!   │    slack    │     Header     │      size usable bytes   │ slack │
//!   │             │  raw  │  size  │                          │       │
//!   └─────────────┴────────────────┴──────────────────────────┴───────┘
//! ```
//!
//! `free` and `realloc` read the header back to find the raw pointer and the
//! size to copy. `realloc` allocates a new block, copies and frees the old
//! one; shrinks and large blocks are instead resized by the underlying
//! allocator and the payload is shifted if the new raw block has a different
//! alignment offset.
//!
//! ## Safety
//!
//! As with `malloc`/`free`, double frees, frees of foreign pointers and use
//! after free are undefined behaviour and are not detected.

pub mod align;
mod aligned;
mod config;
mod error;
pub mod handler;
mod header;
mod host;
mod policy;
mod raw;

pub use aligned::AlignedAllocator;
pub use config::{AllocatorConfig, DEFAULT_ALIGNMENT, DEFAULT_RESIZE_IN_PLACE_MIN};
pub use error::{Error, Result};
pub use handler::{ALIGNED_HANDLER, DEFAULT_HANDLER, MemAllocator, MemHandler};
pub use header::{HEADER_SIZE, Header};
pub use host::{Host, HostBuffer, LocalHost};
pub use policy::{PolicyBinding, PolicyState, disable, enable, is_active};
pub use raw::{CountingAlloc, LibcAlloc, RawAlloc};
