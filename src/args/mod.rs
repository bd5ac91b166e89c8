mod cli;
mod parsers;

pub use cli::FlutArgs;
pub use parsers::parse_duration_arg;
