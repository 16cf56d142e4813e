#![deny(unsafe_code, bare_trait_objects)]
#![deny(missing_docs)]

//! This crate provides the client side of SASL authentication as used by XMPP, with the
//! PLAIN, DIGEST-MD5, SCRAM-SHA-1, SCRAM-SHA-256 and SCRAM-SHA-512 mechanisms (the SCRAM
//! ones also in their channel-binding -PLUS variants), as well as ANONYMOUS and EXTERNAL.
//!
//! # Examples
//!
//! ```rust
//! use sasl::client::mechanisms::Plain;
//! use sasl::client::Mechanism;
//! use sasl::common::Credentials;
//!
//! let creds = Credentials::default()
//!     .with_username("user")
//!     .with_password("pencil");
//!
//! let mut mechanism = Plain::from_credentials(creds).unwrap();
//!
//! let initial_data = mechanism.initial();
//!
//! assert_eq!(initial_data, b"\0user\0pencil");
//! ```
//!
//! Most users will rather go through the [`Engine`], which picks a mechanism among those
//! offered by the server and drives the exchange:
//!
//! ```rust
//! use sasl::common::Credentials;
//! use sasl::{Engine, SelectionPolicy, ServerMessage, Step};
//!
//! let policy = SelectionPolicy {
//!     encrypted: true,
//!     ..Default::default()
//! };
//! let kind = policy.select(vec!["PLAIN", "SCRAM-SHA-1"]).unwrap();
//! assert_eq!(kind.name(), "SCRAM-SHA-1");
//!
//! let creds = Credentials::default()
//!     .with_username("user")
//!     .with_password("pencil");
//! let mut engine = Engine::new(kind, creds).unwrap();
//! let auth = engine.start().unwrap();
//! assert!(auth.starts_with(b"n,,n=user,r="));
//! assert_eq!(
//!     engine.step(ServerMessage::Failure("not-authorized")).unwrap_err().reason(),
//!     "not-authorized",
//! );
//! ```
//!
//! # Usage
//!
//! You can use this in your crate by adding this under `dependencies` in your `Cargo.toml`:
//!
//! ```toml,ignore
//! sasl = "*"
//! ```

mod error;

pub use crate::error::AuthError;

/// Client-side mechanisms.
pub mod client;
/// Credentials, channel binding and helpers shared by the mechanisms.
pub mod common;
pub mod engine;

pub use crate::common::{decode_payload, encode_payload, ChannelBinding, Credentials, Secret};
pub use crate::engine::{binding_for, Engine, MechanismKind, SelectionPolicy, ServerMessage, Step};
