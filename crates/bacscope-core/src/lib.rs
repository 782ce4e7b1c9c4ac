//! BACnet protocol encoding and decoding in pure Rust.
//!
//! `bacscope-core` provides zero-copy, `no_std`-compatible encoding and decoding
//! of BACnet APDUs, NPDUs, network-layer messages and service payloads. The
//! client engine and the local object server of `bacscope-client` both speak
//! through these codecs.
//!
//! # Feature flags
//!
//! - **`std`** (default): enables `std::error::Error` implementations.
//! - **`alloc`** (default): enables codecs that allocate (RPM, COV, ReadRange, lists).
//! - **`serde`**: derives `Serialize`/`Deserialize` on identifier types.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

/// APDU (Application Protocol Data Unit) types for confirmed/unconfirmed requests and responses.
pub mod apdu;
/// Binary encoding primitives, tag system, and zero-copy reader/writer.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// Network-layer (router) messages.
pub mod network;
/// NPDU (Network Protocol Data Unit) encoding and decoding.
pub mod npdu;
/// BACnet service request and response codecs.
pub mod services;
/// Core BACnet data types: object identifiers, property identifiers, and data values.
pub mod types;

pub use error::{DecodeError, EncodeError};
