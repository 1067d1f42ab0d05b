//! `#[derive(BinaryCodec)]` for fixed-layout container headers.
//!
//! Only structs are supported. Fields are written and read in declaration
//! order through `crate::types::encoding`, so the deriving crate must expose
//! that module. Program headers have no variant tags, so enums are rejected.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data_struct = match &input.data {
        Data::Struct(data_struct) => data_struct,
        Data::Enum(_) | Data::Union(_) => {
            return syn::Error::new_spanned(&input, "BinaryCodec can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (encode_body, decode_body) = match &data_struct.fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            let encode = names.iter().map(|n| {
                quote! { crate::types::encoding::Encode::encode(&self.#n, out); }
            });
            let decode = names.iter().map(|n| {
                quote! { #n: crate::types::encoding::Decode::decode(input)?, }
            });
            (
                quote! { #(#encode)* },
                quote! { Ok(Self { #(#decode)* }) },
            )
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let encode = indices.iter().map(|i| {
                quote! { crate::types::encoding::Encode::encode(&self.#i, out); }
            });
            let decode = indices.iter().map(|_| {
                quote! { crate::types::encoding::Decode::decode(input)?, }
            });
            (
                quote! { #(#encode)* },
                quote! { Ok(Self( #(#decode)* )) },
            )
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    };

    let expanded = quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    };

    TokenStream::from(expanded)
}
