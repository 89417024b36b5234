use heck::ToUpperCamelCase;
use proc_macro2::TokenStream;
use quote::quote;

use crate::pdl::{Command, DataType, Domain, Event, Item, Param, TypeDef, Variant};

const DOCS_URL: &str = "https://chromedevtools.github.io/devtools-protocol/tot/";

/// Everything of a domain that becomes a rust type.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Definition<'a> {
    Type(&'a TypeDef<'a>),
    Command(&'a Command<'a>),
    Event(&'a Event<'a>),
}

/// The definitions of the domain: types first, then commands, then events
pub(crate) fn definitions<'a>(domain: &'a Domain<'a>) -> impl Iterator<Item = Definition<'a>> {
    let types = domain.types.iter().map(Definition::Type);
    let commands = domain.commands.iter().map(Definition::Command);
    let events = domain.events.iter().map(Definition::Event);
    types.chain(commands).chain(events)
}

impl<'a> Definition<'a> {
    fn data_type(&self) -> &'a dyn DataType {
        match *self {
            Definition::Type(ty) => ty,
            Definition::Command(cmd) => cmd,
            Definition::Event(ev) => ev,
        }
    }

    /// Fragment prefix of the item on the protocol viewer
    fn anchor(&self) -> &'static str {
        match self {
            Definition::Type(_) => "type",
            Definition::Command(_) => "method",
            Definition::Event(_) => "event",
        }
    }

    /// `#[doc]` attribute with the description and a link to the protocol
    /// viewer
    pub fn doc_attr(&self, domain: &str) -> TokenStream {
        let link = format!(
            "[{name}]({url}{domain}/#{anchor}-{name})",
            name = self.name(),
            url = DOCS_URL,
            anchor = self.anchor()
        );
        let doc = match self.description() {
            Some(desc) => format!("{}\n{}", desc, link),
            None => link,
        };
        quote! { #[doc = #doc] }
    }

    pub fn rust_name(&self) -> String {
        let name = self.name().to_upper_camel_case();
        match self {
            Definition::Type(_) => name,
            Definition::Command(_) => name + "Params",
            Definition::Event(_) => format!("Event{}", name),
        }
    }

    /// The fields of the generated struct, empty for enums and newtypes
    pub fn fields(&self) -> &'a [Param<'a>] {
        match *self {
            Definition::Type(TypeDef {
                item: Some(Item::Properties(params)),
                ..
            }) => params.as_slice(),
            Definition::Type(_) => &[],
            Definition::Command(cmd) => cmd.parameters.as_slice(),
            Definition::Event(ev) => ev.parameters.as_slice(),
        }
    }

    pub fn variants(&self) -> Option<&'a [Variant<'a>]> {
        match *self {
            Definition::Type(TypeDef {
                item: Some(Item::Enum(vars)),
                ..
            }) => Some(vars.as_slice()),
            _ => None,
        }
    }

    /// The method name on the wire, `Domain.method`
    pub fn identifier(&self) -> &'a str {
        match *self {
            Definition::Type(ty) => ty.raw_name.as_ref(),
            Definition::Command(cmd) => cmd.raw_name.as_ref(),
            Definition::Event(ev) => ev.raw_name.as_ref(),
        }
    }
}

impl DataType for Definition<'_> {
    fn is_circular_dep(&self) -> bool {
        self.data_type().is_circular_dep()
    }

    fn is_experimental(&self) -> bool {
        self.data_type().is_experimental()
    }

    fn is_deprecated(&self) -> bool {
        self.data_type().is_deprecated()
    }

    fn description(&self) -> Option<&str> {
        self.data_type().description()
    }

    fn name(&self) -> &str {
        self.data_type().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdl::parse_pdl;

    const PDL: &str = r#"
version
  major 1
  minor 3

domain Page
  # Unique frame identifier.
  type FrameId extends string

  type TransitionType extends string
    enum
      link
      typed

  command navigate
    parameters
      string url
      optional TransitionType transitionType

  event loadEventFired
    parameters
      number timestamp
"#;

    #[test]
    fn lists_types_commands_then_events() {
        let protocol = parse_pdl(PDL).unwrap();
        let domain = &protocol.domains[0];

        let names: Vec<_> = definitions(domain).map(|d| d.rust_name()).collect();
        assert_eq!(
            names,
            vec!["FrameId", "TransitionType", "NavigateParams", "EventLoadEventFired"]
        );
        let ids: Vec<_> = definitions(domain).map(|d| d.identifier()).collect();
        assert_eq!(ids[2], "Page.navigate");
        assert_eq!(ids[3], "Page.loadEventFired");
    }

    #[test]
    fn exposes_fields_and_variants() {
        let protocol = parse_pdl(PDL).unwrap();
        let domain = &protocol.domains[0];
        let items: Vec<_> = definitions(domain).collect();

        assert!(items[0].fields().is_empty());
        assert!(items[0].variants().is_none());
        assert_eq!(items[1].variants().map(<[_]>::len), Some(2));
        assert_eq!(items[2].fields().len(), 2);
        assert!(items[2].fields()[1].optional);
        assert_eq!(items[3].fields()[0].name(), "timestamp");
    }

    #[test]
    fn links_to_protocol_viewer() {
        let protocol = parse_pdl(PDL).unwrap();
        let domain = &protocol.domains[0];
        let items: Vec<_> = definitions(domain).collect();

        let doc = "Unique frame identifier.\n[FrameId](https://chromedevtools.github.io/devtools-protocol/tot/Page/#type-FrameId)";
        assert_eq!(
            items[0].doc_attr("Page").to_string(),
            quote! { #[doc = #doc] }.to_string()
        );
        let doc = "[navigate](https://chromedevtools.github.io/devtools-protocol/tot/Page/#method-navigate)";
        assert_eq!(
            items[2].doc_attr("Page").to_string(),
            quote! { #[doc = #doc] }.to_string()
        );
    }
}
