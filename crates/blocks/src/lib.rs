//! `blocks` crate — the `ExecutableBlock` trait, the type-tag registry and
//! the built-in block types.
//!
//! Every block type — built-in and custom alike — must implement
//! [`ExecutableBlock`]. The engine crate resolves the implementation for a
//! block's `type` through [`BlockRegistry`] and never matches on type tags
//! itself.

pub mod error;
pub mod traits;
pub mod registry;
pub mod settings;
pub mod template;
pub mod builtin;
pub mod mock;

pub use error::BlockError;
pub use traits::{BlockInvocation, BlockResult, Context, ExecutableBlock};
pub use registry::BlockRegistry;
pub use settings::{BlockSettings, LlmSettings};
