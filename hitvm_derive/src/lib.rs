//! Derive macros for the hitvm crate.
//!
//! - `#[derive(BinaryCodec)]` - little-endian `Encode`/`Decode` for header structs
//! - `#[derive(Error)]` - `Display` + `std::error::Error` from `#[error("...")]`

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` by visiting fields in declaration order.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` for error enums and structs.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
