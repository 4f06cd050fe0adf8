//! Reference `StateReader`: the core never parses a
//! declarative configuration language itself, so this is the one
//! implementation this crate ships, good enough to round-trip `plan`/`apply`
//! without pulling in a full SQL grammar.

pub mod directory_reader;
