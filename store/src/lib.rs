//! The Pandora root and everything that mutates it.
//!
//! This crate owns the on-disk state machine: the immutable store under
//! `store/`, the symlink-forest profiles under `profiles/`, the live
//! pointer `vir`, and the pipeline that turns a registry entry into an
//! activated profile. All mutation goes through the advisory lock in
//! [lock], and every publishing step is a temp-then-rename; a crash at
//! any point leaves the visible state either fully old or fully new.
//!
//! Library code never touches the terminal; errors surface as [Error]
//! and logging goes through [tracing].

pub mod activate;
pub mod conf;
pub mod error;
pub mod fetch;
pub mod gc;
pub mod ident;
pub mod import;
pub mod layout;
pub mod lock;
pub mod manifest;
pub mod ops;
pub mod profile;
pub mod registry;
pub mod signature;

pub use error::Error;
pub use ident::PkgId;
pub use layout::PandoraRoot;
