//! # dynfi – a dynamic function interface.
//!
//! `dynfi` materializes C-level data layouts and call signatures at runtime
//! from a compact textual descriptor notation. A parsed [`DynType`] can
//!
//! - allocate and deep-free conformant memory images ([`Instance`]),
//! - introspect fields and platform offsets matching the native ABI,
//! - participate in libffi calls as argument or return type
//!   ([`DynFunction`]), including closure trampolines for callbacks,
//! - convert instances to and from JSON ([`json`]) and a compact
//!   AVRO-style binary wire format ([`avro`]).
//!
//! Section-based descriptor files group named types with methods
//! ([`DynInterface`]) or a single payload type ([`DynMessage`]) for
//! RPC-style and pub/sub-style use.
//!
//! ```
//! use dynfi::{json, DynType};
//!
//! let ty = DynType::parse("{DD x y}")?;
//! let point = json::deserialize(&ty, br#"{"x":1.0,"y":2.0}"#)?;
//! let text = json::serialize(&point)?;
//! assert!(text.contains("\"x\":1.0"));
//! # Ok::<(), dynfi::DfiError>(())
//! ```
//!
//! No handle in this crate is thread-safe for concurrent mutation; parsed
//! type graphs are immutable and may be read from multiple threads.

pub mod error;
pub use error::{trail, DfiError, Result};

pub mod version;
pub use version::Version;

pub mod map;
pub use map::{LongMap, StringMap};

mod scanner;

pub mod types;
pub use types::{DynType, Instance, SimpleKind, TypeClass, TypePool, TypeView};

pub mod function;
pub use function::{ArgMeta, Argument, ClosureBind, DynFunction};

mod descriptor;

pub mod interface;
pub use interface::{DynInterface, Method};

pub mod message;
pub use message::DynMessage;

pub mod json;

pub mod avro;
