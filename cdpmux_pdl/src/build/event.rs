use heck::ToUpperCamelCase;
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

use crate::pdl::{DataType, Domain, Event};

/// A single event as variant of the domain's event enum
pub struct EventType<'a> {
    pub inner: &'a Event<'a>,
}

impl<'a> EventType<'a> {
    fn ty_ident(&self) -> Ident {
        format_ident!("Event{}", self.inner.name().to_upper_camel_case())
    }

    fn var_ident(&self) -> Ident {
        format_ident!("{}", self.inner.name().to_upper_camel_case())
    }
}

/// Generates the domain marker type and the sum type over all events of a
/// domain.
pub struct DomainBuilder<'a> {
    domain: &'a Domain<'a>,
    events: Vec<EventType<'a>>,
    types_crate: &'a Ident,
}

impl<'a> DomainBuilder<'a> {
    pub fn new(domain: &'a Domain<'a>, events: Vec<EventType<'a>>, types_crate: &'a Ident) -> Self {
        Self {
            domain,
            events,
            types_crate,
        }
    }

    pub fn marker_ident(domain: &Domain) -> Ident {
        format_ident!("{}Domain", domain.name.to_upper_camel_case())
    }

    pub fn event_enum_ident(domain: &Domain) -> Ident {
        format_ident!("{}Event", domain.name.to_upper_camel_case())
    }

    pub fn build(self) -> TokenStream {
        let types = self.types_crate;
        let marker = Self::marker_ident(self.domain);
        let event_enum = Self::event_enum_ident(self.domain);
        let domain_name = self.domain.name.as_ref();

        let var_idents: Vec<_> = self.events.iter().map(EventType::var_ident).collect();
        let ty_idents: Vec<_> = self.events.iter().map(EventType::ty_ident).collect();

        let marker_doc = format!("The `{}` domain", domain_name);
        let enum_doc = format!("All events of the `{}` domain", domain_name);

        let from_method = if self.events.is_empty() {
            quote! {
                let _ = (method, params);
                Ok(None)
            }
        } else {
            quote! {
                // events without parameters may omit `params` entirely
                let params = if params.is_null() {
                    ::serde_json::Value::Object(Default::default())
                } else {
                    params
                };
                match method {
                    #(#ty_idents::IDENTIFIER => Ok(Some(#event_enum::#var_idents(::serde_json::from_value(params)?))),)*
                    _ => Ok(None),
                }
            }
        };

        quote! {
            #[doc = #marker_doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
            pub struct #marker;

            impl #types::Domain for #marker {
                const NAME: &'static str = #domain_name;
                const EVENTS: &'static [&'static str] = &[#(#ty_idents::IDENTIFIER),*];
                type Event = #event_enum;
            }

            #[doc = #enum_doc]
            #[derive(Debug, Clone, PartialEq)]
            #[allow(clippy::large_enum_variant)]
            pub enum #event_enum {
                #(#var_idents(#ty_idents),)*
            }

            impl #types::DomainEvents for #event_enum {
                fn from_method(method: &str, params: ::serde_json::Value) -> ::serde_json::Result<Option<Self>> {
                    #from_method
                }

                fn identifier(&self) -> #types::MethodId {
                    match *self {
                        #(#event_enum::#var_idents(ref ev) => #types::Method::identifier(ev),)*
                    }
                }

                fn payload(&self) -> &dyn ::std::any::Any {
                    match *self {
                        #(#event_enum::#var_idents(ref ev) => ev,)*
                    }
                }
            }

            #(
                impl From<#ty_idents> for #event_enum {
                    fn from(ev: #ty_idents) -> Self {
                        #event_enum::#var_idents(ev)
                    }
                }
            )*
        }
    }
}
