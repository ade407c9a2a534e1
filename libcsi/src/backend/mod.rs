//! Storage backends implementing the CSI service traits.
//!
//! Each backend module provides a concrete type that implements
//! [`crate::CsiIdentity`] and [`crate::CsiNode`].

pub mod smb;
