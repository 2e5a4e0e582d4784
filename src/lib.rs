pub mod cache;
pub mod cli;
pub mod config;
pub mod cycles;
pub mod error;
pub mod impact;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod reverse_index;
pub mod rpc;
pub mod scan;
pub mod spider;
pub mod symbol_index;
pub mod util;
pub mod watch;
pub mod worker;
