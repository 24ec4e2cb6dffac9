pub mod error;
pub mod session;
pub mod presence;
pub mod locks;
pub mod cursors;
pub mod router;
pub mod sweeper;
