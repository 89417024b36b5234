//! Parser for the DevTools protocol definition language (`.pdl`) and a
//! generator that turns parsed protocols into rust bindings for `cdpmux`.

pub mod build;
pub mod pdl;
