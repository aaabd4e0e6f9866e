/// PTY (Pseudo Terminal) handling for rs_workspace
/// The factory trait keeps the terminal bridge independent of how the
/// pseudo-terminal pair is opened.
mod portable_pty_impl;
mod pty_trait;

pub use portable_pty_impl::PortablePtyFactory;
pub use pty_trait::*;
