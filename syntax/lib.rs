#![cfg_attr(feature = "cargo-clippy", warn(clippy))]
#![warn(rust_2018_idioms)]

pub mod analyze;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod expr;
pub mod lexer;
pub mod line_index;
pub mod parser;
pub mod scope;
pub mod span;
pub mod token;
pub mod tree;
