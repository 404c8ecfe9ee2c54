#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;

pub use self::args::Args;
