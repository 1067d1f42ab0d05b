//! `#[derive(Error)]`: a small `thiserror` stand-in.
//!
//! ```ignore
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("bad tag {0}")]
//!     BadTag(u32),
//!     #[error("expected {expected} bytes")]
//!     Short { expected: usize },
//! }
//! ```
//!
//! Positional placeholders (`{0}`) are rewritten to generated bindings
//! (`{f0}`); named placeholders bind to the field of the same name.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let msg = message(&variant.attrs, variant)?;
                    Ok(match &variant.fields {
                        Fields::Unit => quote! { Self::#ident => write!(f, #msg), },
                        Fields::Unnamed(fields) => {
                            let binds: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| format_ident!("f{}", i))
                                .collect();
                            let msg = positional_to_named(&msg, binds.len());
                            quote! {
                                Self::#ident(#(#binds),*) => write!(f, #msg, #(#binds = #binds),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let binds: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                            quote! {
                                #[allow(unused_variables)]
                                Self::#ident { #(#binds),* } => write!(f, #msg, #(#binds = #binds),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! { match self { #(#arms)* } }
        }
        Data::Struct(data_struct) => {
            let msg = message(&input.attrs, &input.ident)?;
            match &data_struct.fields {
                Fields::Unit => quote! { write!(f, #msg) },
                Fields::Named(fields) => {
                    let binds: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! { write!(f, #msg, #(#binds = self.#binds),*) }
                }
                Fields::Unnamed(fields) => {
                    let binds: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| format_ident!("f{}", i))
                        .collect();
                    let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
                    let msg = positional_to_named(&msg, binds.len());
                    quote! { write!(f, #msg, #(#binds = self.#indices),*) }
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(input, "Error cannot be derived for unions"));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Reads the string literal out of `#[error("...")]`.
fn message<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<String> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("error")) else {
        return Err(syn::Error::new_spanned(
            target,
            "missing #[error(\"...\")] attribute",
        ));
    };
    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "expected #[error(\"message\")]",
        ));
    };
    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(s)) => Ok(s.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a string literal",
        )),
    }
}

fn positional_to_named(msg: &str, count: usize) -> String {
    (0..count).rev().fold(msg.to_string(), |acc, i| {
        acc.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{f{i}:"))
    })
}
