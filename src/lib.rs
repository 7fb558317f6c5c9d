//! Embeddable threaded-code Forth interpreter and compiler.
//!
//! [`Forth`] is the host-facing entry point: build one with
//! [`Forth::init`], feed it source with [`Forth::eval`] or
//! [`Forth::set_file_input`], and drive it with [`Forth::run`].

pub mod bootstrap;
pub mod dictionary;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod kernel;
pub mod messages;
pub mod reader;
pub mod runtime;
pub mod terminal;

pub use error::{ForthError, Result, VmFault};
pub use kernel::Cell;
pub use messages::{DebugLevel, Msg};
pub use runtime::Forth;
