//! Shared utilities: env-var substitution, duration strings, MIME
//! classification, relaxed datetime parsing, and the hardened XML tree
//! converter.

pub mod dates;
pub mod duration;
pub mod envvar;
pub mod mime;
pub mod xmltree;
