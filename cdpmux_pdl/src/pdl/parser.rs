use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::pdl::{Command, Domain, Event, Item, Param, Protocol, Redirect, Type, TypeDef, Variant};

/// Indentation of one nesting level
const INDENT: usize = 2;

static ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:(?:experimental|deprecated)\s+)*)(domain|command|event)\s+(\w+)$").unwrap()
});

static TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:(?:experimental|deprecated)\s+)*)type\s+(\w+)\s+extends\s+(array\s+of\s+)?([\w.]+)$")
        .unwrap()
});

static PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:(?:experimental|deprecated|optional)\s+)*)(array\s+of\s+)?([\w.]+)\s+(\w+)$")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line of the offending input
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// The top level block currently being parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Version,
    Domain,
}

/// The last item declared inside the current domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Type,
    Command,
    Event,
}

/// The block inside the current item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    Enum,
    Properties,
    Parameters,
    Returns,
}

#[derive(Debug, Default)]
struct Modifiers {
    experimental: bool,
    deprecated: bool,
    optional: bool,
}

impl Modifiers {
    fn parse(s: &str) -> Self {
        let mut m = Modifiers::default();
        for word in s.split_whitespace() {
            match word {
                "experimental" => m.experimental = true,
                "deprecated" => m.deprecated = true,
                "optional" => m.optional = true,
                _ => {}
            }
        }
        m
    }
}

fn group<'h>(caps: &Captures<'h>, idx: usize) -> &'h str {
    caps.get(idx).map_or("", |m| m.as_str())
}

fn take_description<'a>(comments: &mut Vec<&'a str>) -> Option<Cow<'a, str>> {
    let desc = match comments.len() {
        0 => None,
        1 => Some(Cow::Borrowed(comments[0])),
        _ => Some(Cow::Owned(comments.join("\n"))),
    };
    comments.clear();
    desc
}

struct Parser<'a> {
    protocol: Protocol<'a>,
    section: Section,
    owner: Option<Owner>,
    block: Block,
}

impl<'a> Parser<'a> {
    fn domain(&mut self, line: usize) -> Result<&mut Domain<'a>, ParseError> {
        if self.section != Section::Domain {
            return Err(ParseError::new(line, "declaration outside of a domain"));
        }
        self.protocol
            .domains
            .last_mut()
            .ok_or_else(|| ParseError::new(line, "declaration outside of a domain"))
    }

    /// The parameter list the current block appends to
    fn params(&mut self, line: usize) -> Result<&mut Vec<Param<'a>>, ParseError> {
        let owner = self.owner;
        let block = self.block;
        let domain = self.domain(line)?;
        let params = match (owner, block) {
            (Some(Owner::Type), Block::Properties) => {
                match domain.types.last_mut().and_then(|ty| ty.item.as_mut()) {
                    Some(Item::Properties(params)) => Some(params),
                    _ => None,
                }
            }
            (Some(Owner::Command), Block::Parameters) => {
                domain.commands.last_mut().map(|cmd| &mut cmd.parameters)
            }
            (Some(Owner::Command), Block::Returns) => {
                domain.commands.last_mut().map(|cmd| &mut cmd.returns)
            }
            (Some(Owner::Event), Block::Parameters) => {
                domain.events.last_mut().map(|ev| &mut ev.parameters)
            }
            _ => None,
        };
        params.ok_or_else(|| ParseError::new(line, "parameter outside of a parameter block"))
    }

    fn top_level(
        &mut self,
        line: usize,
        text: &'a str,
        description: Option<Cow<'a, str>>,
    ) -> Result<(), ParseError> {
        if text == "version" {
            self.section = Section::Version;
            return Ok(());
        }
        let caps = ITEM
            .captures(text)
            .filter(|caps| group(caps, 2) == "domain")
            .ok_or_else(|| ParseError::new(line, format!("expected `domain`, found `{}`", text)))?;
        let modifiers = Modifiers::parse(group(&caps, 1));
        let mut domain = Domain::new(group(&caps, 3));
        domain.description = description;
        domain.experimental = modifiers.experimental;
        domain.deprecated = modifiers.deprecated;
        self.protocol.domains.push(domain);
        self.section = Section::Domain;
        self.owner = None;
        self.block = Block::None;
        Ok(())
    }

    fn version(&mut self, line: usize, text: &'a str) -> Result<(), ParseError> {
        let (key, value) = text
            .split_once(char::is_whitespace)
            .ok_or_else(|| ParseError::new(line, "expected `major <n>` or `minor <n>`"))?;
        let value = value
            .trim()
            .parse::<usize>()
            .map_err(|err| ParseError::new(line, format!("invalid version number: {}", err)))?;
        match key {
            "major" => self.protocol.version.major = value,
            "minor" => self.protocol.version.minor = value,
            _ => {
                return Err(ParseError::new(
                    line,
                    format!("unknown version key `{}`", key),
                ))
            }
        }
        Ok(())
    }

    fn domain_item(
        &mut self,
        line: usize,
        text: &'a str,
        description: Option<Cow<'a, str>>,
    ) -> Result<(), ParseError> {
        if let Some(dep) = text.strip_prefix("depends on ") {
            self.domain(line)?.dependencies.push(Cow::Borrowed(dep.trim()));
            return Ok(());
        }

        self.block = Block::None;
        let domain = self.domain(line)?;
        let domain_name = domain.name.clone();

        if let Some(caps) = TYPE.captures(text) {
            let modifiers = Modifiers::parse(group(&caps, 1));
            let name = group(&caps, 2);
            domain.types.push(TypeDef {
                description,
                experimental: modifiers.experimental,
                deprecated: modifiers.deprecated,
                name: Cow::Borrowed(name),
                extends: Type::new(group(&caps, 4), caps.get(3).is_some()),
                item: None,
                raw_name: Cow::Owned(format!("{}.{}", domain_name, name)),
                is_circular_dep: false,
            });
            self.owner = Some(Owner::Type);
            return Ok(());
        }

        let caps = ITEM.captures(text).ok_or_else(|| {
            ParseError::new(line, format!("expected a type, command or event: `{}`", text))
        })?;
        let modifiers = Modifiers::parse(group(&caps, 1));
        let name = group(&caps, 3);
        let raw_name = Cow::Owned(format!("{}.{}", domain_name, name));
        match group(&caps, 2) {
            "command" => {
                domain.commands.push(Command {
                    description,
                    experimental: modifiers.experimental,
                    deprecated: modifiers.deprecated,
                    name: Cow::Borrowed(name),
                    redirect: None,
                    parameters: Vec::new(),
                    returns: Vec::new(),
                    raw_name,
                    is_circular_dep: false,
                });
                self.owner = Some(Owner::Command);
            }
            "event" => {
                domain.events.push(Event {
                    description,
                    experimental: modifiers.experimental,
                    deprecated: modifiers.deprecated,
                    name: Cow::Borrowed(name),
                    parameters: Vec::new(),
                    raw_name,
                    is_circular_dep: false,
                });
                self.owner = Some(Owner::Event);
            }
            other => {
                return Err(ParseError::new(
                    line,
                    format!("nested `{}` inside a domain", other),
                ))
            }
        }
        Ok(())
    }

    fn item_block(
        &mut self,
        line: usize,
        text: &'a str,
        description: Option<Cow<'a, str>>,
    ) -> Result<(), ParseError> {
        let owner = self.owner;
        let domain = self.domain(line)?;
        match (owner, text) {
            (Some(Owner::Type), "enum") => {
                if let Some(ty) = domain.types.last_mut() {
                    ty.item = Some(Item::Enum(Vec::new()));
                }
                self.block = Block::Enum;
            }
            (Some(Owner::Type), "properties") => {
                if let Some(ty) = domain.types.last_mut() {
                    ty.item = Some(Item::Properties(Vec::new()));
                }
                self.block = Block::Properties;
            }
            (Some(Owner::Command), "parameters") | (Some(Owner::Event), "parameters") => {
                self.block = Block::Parameters;
            }
            (Some(Owner::Command), "returns") => {
                self.block = Block::Returns;
            }
            (Some(Owner::Command), _) if text.starts_with("redirect ") => {
                let target = text["redirect ".len()..].trim();
                let (domain_name, name) = match target.split_once('.') {
                    Some((d, n)) => (d, Some(Cow::Borrowed(n))),
                    None => (target, None),
                };
                if let Some(cmd) = domain.commands.last_mut() {
                    cmd.redirect = Some(Redirect {
                        description,
                        domain: Cow::Borrowed(domain_name),
                        name,
                    });
                }
            }
            _ => {
                return Err(ParseError::new(
                    line,
                    format!("unexpected `{}` at item level", text),
                ))
            }
        }
        Ok(())
    }

    fn param(
        &mut self,
        line: usize,
        text: &'a str,
        description: Option<Cow<'a, str>>,
    ) -> Result<(), ParseError> {
        if self.block == Block::Enum && self.owner == Some(Owner::Type) {
            let domain = self.domain(line)?;
            if let Some(Item::Enum(vars)) = domain.types.last_mut().and_then(|ty| ty.item.as_mut())
            {
                vars.push(Variant {
                    description,
                    name: Cow::Borrowed(text),
                });
                return Ok(());
            }
            return Err(ParseError::new(line, "enum variant outside of an enum"));
        }

        let caps = PARAM
            .captures(text)
            .ok_or_else(|| ParseError::new(line, format!("invalid parameter `{}`", text)))?;
        let modifiers = Modifiers::parse(group(&caps, 1));
        let name = group(&caps, 4);
        let param = Param {
            description,
            experimental: modifiers.experimental,
            deprecated: modifiers.deprecated,
            optional: modifiers.optional,
            r#type: Type::new(group(&caps, 3), caps.get(2).is_some()),
            name: Cow::Borrowed(name),
            raw_name: Cow::Borrowed(name),
            is_circular_dep: false,
        };
        self.params(line)?.push(param);
        Ok(())
    }

    /// A variant of an enum declared inline as parameter
    fn param_variant(
        &mut self,
        line: usize,
        text: &'a str,
        description: Option<Cow<'a, str>>,
    ) -> Result<(), ParseError> {
        let param = self
            .params(line)?
            .last_mut()
            .ok_or_else(|| ParseError::new(line, "enum variant without parameter"))?;
        match &mut param.r#type {
            Type::Enum(vars) => {
                vars.push(Variant {
                    description,
                    name: Cow::Borrowed(text),
                });
                Ok(())
            }
            _ => Err(ParseError::new(
                line,
                format!("`{}` is not an enum parameter", param.name),
            )),
        }
    }
}

/// Parses the content of a `.pdl` file
pub fn parse_pdl(input: &str) -> Result<Protocol<'_>, ParseError> {
    let mut parser = Parser {
        protocol: Protocol::default(),
        section: Section::None,
        owner: None,
        block: Block::None,
    };
    let mut comments = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() {
            comments.clear();
            continue;
        }
        if let Some(comment) = text.strip_prefix('#') {
            comments.push(comment.strip_prefix(' ').unwrap_or(comment));
            continue;
        }

        let indent = raw.len() - raw.trim_start().len();
        if indent % INDENT != 0 {
            return Err(ParseError::new(line, "inconsistent indentation"));
        }
        let description = take_description(&mut comments);

        match (indent / INDENT, parser.section) {
            (0, _) => parser.top_level(line, text, description)?,
            (1, Section::Version) => parser.version(line, text)?,
            (1, _) => parser.domain_item(line, text, description)?,
            (2, _) => parser.item_block(line, text, description)?,
            (3, _) => parser.param(line, text, description)?,
            (4, _) => parser.param_variant(line, text, description)?,
            _ => return Err(ParseError::new(line, "nesting too deep")),
        }
    }

    Ok(parser.protocol)
}
