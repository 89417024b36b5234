pub use generator::*;

mod definition;
mod event;
mod generator;
