//! Derive macros for the chaincore crate.
//!
//! Provides:
//! - `#[derive(Wire)]` - deterministic wire encoding for entity types
//! - `#[derive(Error)]` - error type boilerplate (thiserror replacement)

mod error;
mod wire;

use proc_macro::TokenStream;

/// Implements the `Encode` and `Decode` wire traits for a struct.
///
/// Fields are encoded in declaration order using each field's own
/// `Encode`/`Decode` implementation, so the derived format matches the
/// hand-written descriptors used elsewhere in the crate.
#[proc_macro_derive(Wire)]
pub fn derive_wire(input: TokenStream) -> TokenStream {
    wire::derive_wire(input)
}

/// Implements `Display` and `std::error::Error` for an error enum.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
