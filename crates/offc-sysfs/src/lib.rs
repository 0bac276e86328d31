//! Text control surface for the offload backends, laid out like sysfs.
//!
//! Writes take the same input the kernel attributes would (integers in base 0, optional trailing
//! newline) and reads return a newline-terminated value.

#![forbid(unsafe_code)]

mod attr;
mod kobject;
mod parse;

pub use attr::{
    ActiveMigratorAttr, Attribute, ControlError, NrDmaChanAttr, OffloadControl, OffloadingAttr,
    ThreadsAttr,
};
pub use kobject::{Kobject, SysfsRoot};
pub use parse::{parse_int, parse_uint, ParseError};
