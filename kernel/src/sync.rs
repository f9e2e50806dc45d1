//! Locks for kernel-wide shared state.
//!
//! The fault path may run on several processors at once, so shared tables
//! such as the coremap live behind a [`mutex::Mutex`].

pub mod mutex;
