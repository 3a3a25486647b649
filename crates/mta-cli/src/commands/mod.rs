//! mtactl subcommands

pub mod plan;
pub mod simulate;
