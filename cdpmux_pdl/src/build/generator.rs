use std::collections::HashMap;
use std::fs;
use std::io::{self, Error, ErrorKind};
use std::path::{Path, PathBuf};

use heck::{ToSnakeCase, ToUpperCamelCase};
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

use crate::build::event::{DomainBuilder, EventType};
use crate::build::definition::{definitions, Definition};
use crate::pdl::{parse_pdl, DataType, Domain, Param, Protocol, Type, Variant};

/// Compile `.pdl` files into Rust files during a Cargo build.
///
/// The generated `cdp.rs` is written to the Cargo `OUT_DIR` directory. Every
/// file becomes a module named after its file stem.
///
/// # Example `build.rs`
///
/// ```rust,no_run
/// # use std::io::Result;
/// fn main() -> Result<()> {
///   cdpmux_pdl::build::compile_pdls(&["js_protocol.pdl", "browser_protocol.pdl"])?;
///   Ok(())
/// }
/// ```
pub fn compile_pdls<P: AsRef<Path>>(pdls: &[P]) -> io::Result<()> {
    Generator::default().compile_pdls(pdls)
}

/// Generates rust code for the Chrome DevTools Protocol
#[derive(Debug, Clone)]
pub struct Generator {
    with_experimental: bool,
    with_deprecated: bool,
    out_dir: Option<PathBuf>,
    target_mod: Option<String>,
    protocol_mods: Vec<String>,
    /// Maps each domain name to the index of the protocol it is defined in
    domains: HashMap<String, usize>,
    types_crate: Ident,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            with_experimental: true,
            with_deprecated: false,
            out_dir: None,
            target_mod: None,
            protocol_mods: Vec::new(),
            domains: HashMap::new(),
            types_crate: format_ident!("cdpmux_types"),
        }
    }
}

impl Generator {
    /// Configures the output directory where generated Rust files will be
    /// written.
    ///
    /// If unset, defaults to the `OUT_DIR` environment variable.
    pub fn out_dir<P>(&mut self, path: P) -> &mut Self
    where
        P: Into<PathBuf>,
    {
        self.out_dir = Some(path.into());
        self
    }

    /// Configures whether experimental types and fields should be included.
    ///
    /// Disabling experimental types may result in missing type definitions
    /// (E0412)
    pub fn experimental(&mut self, experimental: bool) -> &mut Self {
        self.with_experimental = experimental;
        self
    }

    /// Configures whether deprecated types and fields should be included.
    pub fn deprecated(&mut self, deprecated: bool) -> &mut Self {
        self.with_deprecated = deprecated;
        self
    }

    /// Configures the name of the module and file generated.
    pub fn target_mod(&mut self, mod_name: impl Into<String>) -> &mut Self {
        self.target_mod = Some(mod_name.into());
        self
    }

    /// Compile `.pdls` files into a single Rust file.
    ///
    /// ```rust,no_run
    /// # use std::io::Result;
    /// fn main() -> Result<()> {
    ///   let mut pdl_build = cdpmux_pdl::build::Generator::default();
    ///   pdl_build.out_dir("some/path").experimental(false);
    ///   pdl_build.compile_pdls(&["js_protocol.pdl", "browser_protocol.pdl"])?;
    ///   Ok(())
    /// }
    /// ```
    pub fn compile_pdls<P: AsRef<Path>>(&mut self, pdls: &[P]) -> io::Result<()> {
        let target: PathBuf = match self.out_dir.clone() {
            Some(dir) => dir,
            None => std::env::var_os("OUT_DIR")
                .ok_or_else(|| {
                    Error::new(ErrorKind::Other, "OUT_DIR environment variable is not set")
                })?
                .into(),
        };

        let mut inputs = Vec::with_capacity(pdls.len());
        for path in pdls {
            let path = path.as_ref();
            let file_name = path.file_stem().ok_or_else(|| {
                Error::new(
                    ErrorKind::Other,
                    format!("Failed to read file name for {}", path.display()),
                )
            })?;
            inputs.push((
                file_name.to_string_lossy().to_string(),
                fs::read_to_string(path)?,
            ));
        }

        let sources: Vec<_> = inputs
            .iter()
            .map(|(name, input)| (name.as_str(), input.as_str()))
            .collect();
        let code = self.compile_sources(&sources)?;

        let output = target.join(format!("{}.rs", self.target_mod_name()));
        fs::write(&output, code)?;
        fmt(&output);
        Ok(())
    }

    /// Generates the rust source for already loaded `(module name, pdl)`
    /// pairs.
    pub fn compile_sources(&mut self, sources: &[(&str, &str)]) -> io::Result<String> {
        self.protocol_mods.clear();
        self.domains.clear();

        let mut protocols = Vec::with_capacity(sources.len());
        for (idx, (mod_name, input)) in sources.iter().enumerate() {
            let pdl = parse_pdl(input).map_err(|err| {
                Error::new(ErrorKind::InvalidData, format!("{}.pdl {}", mod_name, err))
            })?;
            self.domains
                .extend(pdl.domains.iter().map(|d| (d.name.to_string(), idx)));
            self.protocol_mods.push(mod_name.to_snake_case());
            protocols.push(pdl);
        }

        let mut commands = Vec::new();
        let mut events = Vec::new();
        let mut modules = TokenStream::default();

        for (idx, pdl) in protocols.iter().enumerate() {
            let types = self.generate_types(pdl, &mut commands, &mut events);
            let version = format!("{}.{}", pdl.version.major, pdl.version.minor);
            let module_name = format_ident!("{}", self.protocol_mods[idx]);
            modules.extend(quote! {
                pub mod #module_name {
                    /// The version of this protocol definition
                    pub const VERSION: &str = #version;
                    #types
                }
            });
        }

        let mod_ident = format_ident!("{}", self.target_mod_name());
        let stream = quote! {
            #[allow(
                clippy::too_many_arguments,
                clippy::large_enum_variant,
                clippy::new_without_default,
                deprecated,
                unreachable_patterns
            )]
            pub mod #mod_ident {
                /// Identifiers of all commands
                pub const COMMANDS: &[&str] = &[#(#commands),*];
                /// Identifiers of all events
                pub const EVENTS: &[&str] = &[#(#events),*];
                #modules
            }
        };
        Ok(stream.to_string())
    }

    fn target_mod_name(&self) -> &str {
        self.target_mod.as_deref().unwrap_or("cdp")
    }

    fn include_item(&self, item: &impl DataType) -> bool {
        (self.with_deprecated || !item.is_deprecated())
            && (self.with_experimental || !item.is_experimental())
    }

    /// Generate the types for the domains of a protocol.
    ///
    /// Each domain gets its own module
    fn generate_types(
        &self,
        pdl: &Protocol,
        commands: &mut Vec<String>,
        events: &mut Vec<String>,
    ) -> TokenStream {
        let mut modules = TokenStream::default();
        for domain in pdl
            .domains
            .iter()
            .filter(|d| self.with_deprecated || !d.deprecated)
            .filter(|d| self.with_experimental || !d.experimental)
        {
            for dt in definitions(domain).filter(|dt| self.include_item(dt)) {
                match dt {
                    Definition::Command(cmd) => commands.push(cmd.raw_name.to_string()),
                    Definition::Event(ev) => events.push(ev.raw_name.to_string()),
                    Definition::Type(_) => {}
                }
            }

            let domain_mod = self.generate_domain(domain);
            let mod_name = format_ident!("{}", domain.name.to_snake_case());

            let mut desc = if let Some(desc) = domain.description.as_ref() {
                let desc = desc.as_ref();
                quote! {
                    #[doc = #desc]
                }
            } else {
                TokenStream::default()
            };
            if domain.deprecated {
                desc.extend(quote! { #[deprecated] })
            }

            modules.extend(quote! {
                #desc
                pub mod #mod_name {
                    #domain_mod
                }
            });
        }
        modules
    }

    /// Generates all types, commands and events of a single domain
    pub fn generate_domain(&self, domain: &Domain) -> TokenStream {
        let mut stream = TokenStream::default();
        let mut events = Vec::new();
        for dt in definitions(domain).filter(|dt| self.include_item(dt)) {
            if let Definition::Event(ev) = dt {
                events.push(EventType { inner: ev });
            }
            stream.extend(self.generate_type(domain, dt));
        }
        stream.extend(DomainBuilder::new(domain, events, &self.types_crate).build());
        stream
    }

    /// Generates the rust types of a single type, command or event
    fn generate_type(&self, domain: &Domain, dt: Definition) -> TokenStream {
        let types = &self.types_crate;
        let desc = dt.doc_attr(domain.name.as_ref());

        let stream = if let Some(vars) = dt.variants() {
            let name = format_ident!("{}", dt.rust_name());
            generate_enum(&name, desc, vars)
        } else if let Definition::Type(tydef) = dt {
            if tydef.item.is_none() {
                self.generate_newtype(domain, &dt, desc, &tydef.extends)
            } else {
                self.generate_struct(domain, &dt, desc, dt.rust_name(), dt.fields().iter())
            }
        } else {
            let fields = dt.fields().iter();
            let mut stream = self.generate_struct(domain, &dt, desc, dt.rust_name(), fields);
            let identifier = dt.identifier();
            let name = format_ident!("{}", dt.rust_name());
            stream.extend(quote! {
                impl #name {
                    pub const IDENTIFIER: &'static str = #identifier;
                }

                impl #types::Method for #name {
                    fn identifier(&self) -> #types::MethodId {
                        Self::IDENTIFIER.into()
                    }
                }

                impl #types::MethodType for #name {
                    fn method_id() -> #types::MethodId {
                        Self::IDENTIFIER.into()
                    }
                }
            });

            match dt {
                Definition::Command(cmd) => {
                    let returns_name = format!("{}Returns", cmd.name().to_upper_camel_case());
                    let returns_doc = format!("Response of `{}`", identifier);
                    let returns_desc = quote! { #[doc = #returns_doc] };
                    stream.extend(self.generate_struct(
                        domain,
                        &dt,
                        returns_desc,
                        returns_name.clone(),
                        cmd.returns.iter(),
                    ));

                    let response = format_ident!("{}", returns_name);
                    let marker = DomainBuilder::marker_ident(domain);
                    stream.extend(quote! {
                        impl #types::Command for #name {
                            type Response = #response;
                        }

                        impl #types::DomainCommand for #name {
                            type Domain = #marker;
                        }
                    });
                }
                Definition::Event(_) => {
                    stream.extend(quote! {
                        impl #types::Event for #name {}
                    });
                }
                Definition::Type(_) => {}
            }
            stream
        };

        if dt.is_deprecated() {
            quote! {
                #[deprecated]
                #stream
            }
        } else {
            stream
        }
    }

    /// Wraps a primitive (`type X extends string`) into a newtype
    fn generate_newtype(
        &self,
        domain: &Domain,
        dt: &Definition,
        desc: TokenStream,
        extends: &Type,
    ) -> TokenStream {
        let name = format_ident!("{}", dt.rust_name());
        let wrapped = self.generate_field_type(domain, dt.name(), dt.name(), extends);
        let wrapped = wrapped.ty;

        let derives = if extends.is_hashable() {
            quote! { #[derive(Debug, Clone, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)] }
        } else {
            quote! { #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)] }
        };

        let mut stream = quote! {
            #desc
            #derives
            #[serde(transparent)]
            pub struct #name(#wrapped);

            impl #name {
                pub fn new(val: impl Into<#wrapped>) -> Self {
                    #name(val.into())
                }

                pub fn inner(&self) -> &#wrapped {
                    &self.0
                }

                pub fn into_inner(self) -> #wrapped {
                    self.0
                }
            }

            impl From<#wrapped> for #name {
                fn from(val: #wrapped) -> Self {
                    #name(val)
                }
            }
        };

        if matches!(extends, Type::String) {
            stream.extend(quote! {
                impl AsRef<str> for #name {
                    fn as_ref(&self) -> &str {
                        self.0.as_str()
                    }
                }

                impl From<&str> for #name {
                    fn from(val: &str) -> Self {
                        #name(val.to_string())
                    }
                }

                impl From<#name> for String {
                    fn from(val: #name) -> String {
                        val.0
                    }
                }

                impl ::std::fmt::Display for #name {
                    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                        f.write_str(&self.0)
                    }
                }
            });
        }
        stream
    }

    /// Generates the struct definition and the enums of inline enum
    /// parameters
    fn generate_struct<'a, T>(
        &self,
        domain: &Domain,
        dt: &Definition,
        desc: TokenStream,
        struct_ident: String,
        params: T,
    ) -> TokenStream
    where
        T: Iterator<Item = &'a Param<'a>>,
    {
        let name = format_ident!("{}", struct_ident);
        let mut enum_definitions = TokenStream::default();
        let mut fields = Vec::new();

        for param in params.filter(|p| self.include_item(*p)) {
            if let Type::Enum(vars) = &param.r#type {
                let enum_ident = format_ident!("{}", subenum_name(dt.name(), param.name()));
                let enum_desc = param
                    .description()
                    .map(|desc| quote! { #[doc = #desc] })
                    .unwrap_or_default();
                enum_definitions.extend(generate_enum(&enum_ident, enum_desc, vars));
            }

            let ty = self.generate_field_type(domain, dt.name(), param.name(), &param.r#type);
            fields.push(FieldDefinition {
                raw_name: param.raw_name.as_ref(),
                ident: format_ident!("{}", generate_field_name(param.name())),
                description: param.description(),
                optional: param.optional,
                deprecated: param.is_deprecated(),
                ty,
            });
        }

        let mandatory: Vec<_> = fields.iter().filter(|f| !f.optional).collect();
        let derives = if mandatory.is_empty() {
            quote! { #[derive(Debug, Clone, PartialEq, Default, ::serde::Serialize, ::serde::Deserialize)] }
        } else {
            quote! { #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)] }
        };

        let field_defs = fields.iter().map(FieldDefinition::generate);

        let mut stream = quote! {
            #desc
            #derives
            pub struct #name {
                #(#field_defs)*
            }
            #enum_definitions
        };

        if (1..=4).contains(&mandatory.len()) {
            let args = mandatory.iter().map(|f| {
                let ident = &f.ident;
                let ty = &f.ty.ty;
                quote! { #ident: impl Into<#ty> }
            });
            let inits = fields.iter().map(|f| {
                let ident = &f.ident;
                if f.optional {
                    quote! { #ident: None }
                } else if f.ty.boxed {
                    quote! { #ident: Box::new(#ident.into()) }
                } else {
                    quote! { #ident: #ident.into() }
                }
            });
            stream.extend(quote! {
                impl #name {
                    pub fn new(#(#args),*) -> Self {
                        Self {
                            #(#inits),*
                        }
                    }
                }
            });
        }
        stream
    }

    /// Generates the field type (bool, f64, etc.)
    fn generate_field_type(
        &self,
        domain: &Domain,
        parent: &str,
        param_name: &str,
        ty: &Type,
    ) -> FieldType {
        let types = &self.types_crate;
        match ty {
            Type::Integer => FieldType::new(quote! { i64 }),
            Type::Number => FieldType::new(quote! { f64 }),
            Type::Boolean => FieldType::new(quote! { bool }),
            Type::String => FieldType::new(quote! { String }),
            Type::Object | Type::Any => FieldType::new(quote! { ::serde_json::Value }),
            Type::Binary => FieldType::new(quote! { #types::Binary }),
            Type::Enum(_) => {
                let ty = format_ident!("{}", subenum_name(parent, param_name));
                FieldType::new(quote! { #ty })
            }
            Type::ArrayOf(inner) => {
                // recursive types don't need to be boxed in a vec
                let ty = if let Type::Ref(name) = inner.as_ref() {
                    self.projected_type(domain, name)
                } else {
                    self.generate_field_type(domain, parent, param_name, inner).ty
                };
                FieldType::new(quote! { Vec<#ty> })
            }
            Type::Ref(name) => {
                if is_self_ref(domain, parent, name) {
                    let ident = format_ident!("{}", parent.to_upper_camel_case());
                    FieldType::new_box(quote! { #ident })
                } else {
                    FieldType::new(self.projected_type(domain, name))
                }
            }
        }
    }

    /// Resolve projections: `Runtime.ScriptId` where `Runtime` is the
    /// referenced domain where `ScriptId` is defined.
    ///
    /// If the referenced domain is defined in another pdl than the `domain`'s
    /// pdl, the path moves up an additional level (`super::super`)
    fn projected_type(&self, domain: &Domain, name: &str) -> TokenStream {
        let (path, ty_name) = match name.rsplit_once('.') {
            Some((path, ty_name)) => (path, ty_name),
            None => ("", name),
        };
        let ident = format_ident!("{}", ty_name.to_upper_camel_case());
        if path.is_empty() || path == domain.name.as_ref() {
            return quote! { #ident };
        }

        let super_ident = format_ident!("{}", path.to_snake_case());
        let current = self.domains.get(domain.name.as_ref());
        match self.domains.get(path) {
            Some(idx) if Some(idx) != current => {
                let mod_name = format_ident!("{}", self.protocol_mods[*idx]);
                quote! { super::super::#mod_name::#super_ident::#ident }
            }
            _ => quote! { super::#super_ident::#ident },
        }
    }
}

fn is_self_ref(domain: &Domain, parent: &str, name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((path, ty)) => path == domain.name.as_ref() && ty == parent,
        None => name == parent,
    }
}

/// Generate an enum type with `as_str`, `AsRef<str>` and `FromStr`
fn generate_enum(name: &Ident, desc: TokenStream, variants: &[Variant]) -> TokenStream {
    let idents: Vec<_> = variants
        .iter()
        .map(|v| format_ident!("{}", v.name.to_upper_camel_case()))
        .collect();
    let raw: Vec<_> = variants.iter().map(|v| v.name.as_ref()).collect();
    let docs = variants.iter().map(|v| {
        v.description
            .as_ref()
            .map(|desc| {
                let desc = desc.as_ref();
                quote! { #[doc = #desc] }
            })
            .unwrap_or_default()
    });

    quote! {
        #desc
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum #name {
            #(
                #docs
                #[serde(rename = #raw)]
                #idents,
            )*
        }

        impl #name {
            pub fn as_str(&self) -> &'static str {
                match *self {
                    #(#name::#idents => #raw,)*
                }
            }
        }

        impl AsRef<str> for #name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl ::std::str::FromStr for #name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    #(#raw => Ok(#name::#idents),)*
                    _ => Err(s.to_string()),
                }
            }
        }
    }
}

struct FieldType {
    ty: TokenStream,
    boxed: bool,
}

impl FieldType {
    fn new(ty: TokenStream) -> Self {
        Self { ty, boxed: false }
    }

    fn new_box(ty: TokenStream) -> Self {
        Self { ty, boxed: true }
    }

    fn field_ty(&self) -> TokenStream {
        let ty = &self.ty;
        if self.boxed {
            quote! { Box<#ty> }
        } else {
            ty.clone()
        }
    }
}

struct FieldDefinition<'a> {
    raw_name: &'a str,
    ident: Ident,
    description: Option<&'a str>,
    optional: bool,
    deprecated: bool,
    ty: FieldType,
}

impl FieldDefinition<'_> {
    fn generate(&self) -> TokenStream {
        let raw = self.raw_name;
        let ident = &self.ident;
        let ty = self.ty.field_ty();

        let mut meta = self
            .description
            .map(|desc| quote! { #[doc = #desc] })
            .unwrap_or_default();
        if self.deprecated {
            meta.extend(quote! { #[deprecated] });
        }

        if self.optional {
            quote! {
                #meta
                #[serde(rename = #raw, default, skip_serializing_if = "Option::is_none")]
                pub #ident: Option<#ty>,
            }
        } else {
            quote! {
                #meta
                #[serde(rename = #raw)]
                pub #ident: #ty,
            }
        }
    }
}

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "const", "dyn", "enum", "fn", "for", "impl", "in", "loop",
    "match", "mod", "move", "override", "ref", "static", "struct", "trait", "type", "use",
    "where", "while",
];

/// Escapes reserved rust keywords
pub(crate) fn generate_field_name(name: &str) -> String {
    let name = name.to_snake_case();
    if KEYWORDS.contains(&name.as_str()) {
        format!("r#{}", name)
    } else {
        name
    }
}

/// Creates the name for an enum defined inside a type
///
/// ```text
/// type Parent
///     enum type
/// ```
/// to `ParentType`
fn subenum_name(parent: &str, inner: &str) -> String {
    format!(
        "{}{}",
        parent.to_upper_camel_case(),
        inner.to_upper_camel_case()
    )
}

/// Runs `rustfmt` on the generated file, the unformatted file is kept if
/// `rustfmt` is not available.
pub fn fmt(file: impl AsRef<Path>) {
    use std::process::Command;
    let file = file.as_ref();
    match Command::new("rustfmt")
        .arg("--edition")
        .arg("2021")
        .arg(file)
        .output()
    {
        Ok(output) if !output.status.success() => {
            eprintln!(
                "rustfmt failed for {}: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(_) => {}
        Err(err) => eprintln!("error running rustfmt: {:?}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_keywords() {
        assert_eq!(generate_field_name("type"), "r#type");
        assert_eq!(generate_field_name("requestId"), "request_id");
        assert_eq!(subenum_name("navigate", "transitionType"), "NavigateTransitionType");
    }

    #[test]
    fn detects_self_references() {
        let domain = Domain::new("Runtime");
        assert!(is_self_ref(&domain, "StackTrace", "StackTrace"));
        assert!(is_self_ref(&domain, "StackTrace", "Runtime.StackTrace"));
        assert!(!is_self_ref(&domain, "StackTrace", "Debugger.StackTrace"));
    }

    #[test]
    fn projects_cross_protocol_refs() {
        let mut gen = Generator::default();
        gen.compile_sources(&[
            ("js_protocol", "domain Runtime\n"),
            ("browser_protocol", "domain Network\n"),
        ])
        .unwrap();

        let network = Domain::new("Network");
        assert_eq!(
            gen.projected_type(&network, "Runtime.StackTrace").to_string(),
            quote! { super::super::js_protocol::runtime::StackTrace }.to_string()
        );
        assert_eq!(
            gen.projected_type(&network, "RequestId").to_string(),
            quote! { RequestId }.to_string()
        );
        assert_eq!(
            gen.projected_type(&network, "Unknown.Thing").to_string(),
            quote! { super::unknown::Thing }.to_string()
        );
    }
}
