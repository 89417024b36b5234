use std::borrow::Cow;

pub mod parser;

pub use parser::{parse_pdl, ParseError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Protocol<'a> {
    pub description: Option<Cow<'a, str>>,
    pub version: Version,
    pub domains: Vec<Domain<'a>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: usize,
    pub minor: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Domain<'a> {
    pub description: Option<Cow<'a, str>>,
    pub experimental: bool,
    pub deprecated: bool,
    pub name: Cow<'a, str>,
    pub dependencies: Vec<Cow<'a, str>>,
    pub types: Vec<TypeDef<'a>>,
    pub commands: Vec<Command<'a>>,
    pub events: Vec<Event<'a>>,
}

impl<'a> Domain<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            description: None,
            experimental: false,
            deprecated: false,
            name: Cow::Borrowed(name),
            dependencies: Vec::new(),
            types: Vec::new(),
            commands: Vec::new(),
            events: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef<'a> {
    pub description: Option<Cow<'a, str>>,
    pub experimental: bool,
    pub deprecated: bool,
    pub name: Cow<'a, str>,
    pub extends: Type<'a>,
    pub item: Option<Item<'a>>,
    /// `<domain>.<name>`
    pub raw_name: Cow<'a, str>,
    pub is_circular_dep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type<'a> {
    Integer,
    Number,
    Boolean,
    String,
    Object,
    Any,
    Binary,
    Enum(Vec<Variant<'a>>),
    ArrayOf(Box<Type<'a>>),
    Ref(Cow<'a, str>),
}

impl Type<'_> {
    pub(crate) fn new(ty: &str, is_array: bool) -> Type<'_> {
        if is_array {
            Type::ArrayOf(Box::new(Type::new(ty, false)))
        } else {
            match ty {
                "enum" => Type::Enum(vec![]),
                "integer" => Type::Integer,
                "number" => Type::Number,
                "boolean" => Type::Boolean,
                "string" => Type::String,
                "object" => Type::Object,
                "any" => Type::Any,
                "binary" => Type::Binary,
                _ => Type::Ref(Cow::Borrowed(ty)),
            }
        }
    }

    /// Whether the rust representation of this type can derive `Eq` and
    /// `Hash`
    pub fn is_hashable(&self) -> bool {
        matches!(
            self,
            Type::Integer | Type::Boolean | Type::String | Type::Binary
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item<'a> {
    Enum(Vec<Variant<'a>>),
    Properties(Vec<Param<'a>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant<'a> {
    pub description: Option<Cow<'a, str>>,
    pub name: Cow<'a, str>,
}

impl<'a> Variant<'a> {
    pub fn new(name: &str) -> Variant<'_> {
        Variant {
            description: Default::default(),
            name: Cow::Borrowed(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param<'a> {
    pub description: Option<Cow<'a, str>>,
    pub experimental: bool,
    pub deprecated: bool,
    pub optional: bool,
    pub r#type: Type<'a>,
    pub name: Cow<'a, str>,
    pub raw_name: Cow<'a, str>,
    pub is_circular_dep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command<'a> {
    pub description: Option<Cow<'a, str>>,
    pub experimental: bool,
    pub deprecated: bool,
    pub name: Cow<'a, str>,
    pub redirect: Option<Redirect<'a>>,
    pub parameters: Vec<Param<'a>>,
    pub returns: Vec<Param<'a>>,
    /// `<domain>.<name>`
    pub raw_name: Cow<'a, str>,
    pub is_circular_dep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<'a> {
    pub description: Option<Cow<'a, str>>,
    pub experimental: bool,
    pub deprecated: bool,
    pub name: Cow<'a, str>,
    pub parameters: Vec<Param<'a>>,
    /// `<domain>.<name>`
    pub raw_name: Cow<'a, str>,
    pub is_circular_dep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect<'a> {
    pub description: Option<Cow<'a, str>>,
    pub domain: Cow<'a, str>,
    pub name: Option<Cow<'a, str>>,
}

/// Common accessors of all named protocol items
pub trait DataType {
    fn is_circular_dep(&self) -> bool;

    fn is_experimental(&self) -> bool;

    fn is_deprecated(&self) -> bool;

    fn description(&self) -> Option<&str>;

    fn name(&self) -> &str;
}

macro_rules! impl_data_type {
    ($($ty:ident),*) => {
        $(
            impl<'a> DataType for $ty<'a> {
                fn is_circular_dep(&self) -> bool {
                    self.is_circular_dep
                }

                fn is_experimental(&self) -> bool {
                    self.experimental
                }

                fn is_deprecated(&self) -> bool {
                    self.deprecated
                }

                fn description(&self) -> Option<&str> {
                    self.description.as_deref()
                }

                fn name(&self) -> &str {
                    self.name.as_ref()
                }
            }
        )*
    };
}

impl_data_type!(TypeDef, Param, Command, Event);
