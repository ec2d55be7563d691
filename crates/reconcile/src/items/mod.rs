//! The closed set of item types.

pub mod directory;
pub mod file;
pub mod pkg;
pub mod service;
pub mod symlink;

pub use directory::Directory;
pub use file::File;
pub use pkg::{Manager, Pkg};
pub use service::Service;
pub use symlink::Symlink;
