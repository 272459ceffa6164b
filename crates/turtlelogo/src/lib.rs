//! An interpreter for a small LOGO dialect: turtle graphics, user
//! procedures with numbered lines, lists, and a console.
//!
//! A [`Session`] holds all interpreter state. Feed it lines with
//! [`Session::execute`], or let [`Session::repl`] read them from its
//! [`LineSource`].

mod commands;
pub mod config;
pub mod error;
mod eval;
mod exec;
mod files;
pub mod flow;
pub mod io;
pub mod lexer;
pub mod line;
pub mod path;
pub mod procs;
pub mod scope;
pub mod session;
mod sysprocs;
pub mod token;
pub mod turtle;
pub mod value;

pub use commands::Command;
pub use config::Config;
pub use error::{ErrorKind, Failure};
pub use flow::{Flow, Signal};
pub use io::{LineSource, ReaderSource, ScriptSource, SharedBuffer};
pub use path::{FsResolver, PathResolver};
pub use session::{banner, Outcome, Session};
pub use sysprocs::SysProc;
pub use turtle::{HeadlessTurtle, Renderer};
pub use value::Value;
