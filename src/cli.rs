//! CLI domain: parse, route, output and presentation only.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_config, format_run_json, format_run_text, format_stats_text, format_units_table,
};
pub use route::{load_requests, RequestSpec, RunContext};
