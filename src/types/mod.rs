//! Binary encoding primitives used by the program container.
//!
//! - `Encode`/`Decode`: little-endian serialization traits
//! - `EncodeSink`: byte output abstraction, with a size-counting sink

pub mod encoding;
