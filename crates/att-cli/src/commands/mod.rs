//! Command implementations, one module per subcommand.

pub mod backup;
pub mod extract;
pub mod load;
pub mod merge;
pub mod normalize;
pub mod restore;
pub mod run;
pub mod validate;
