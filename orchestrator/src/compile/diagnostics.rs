//! Compiler error extraction from raw stderr

use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// A compiler error located in one of the sketch's `.ino` files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedError {
    pub file: String,
    pub row: u32,
    pub column: u32,
}

/// Extract `<sketch>/<file>.ino:<row>:<col>: ... error:` locations from compiler output
pub fn parse_errors(stderr: &str, sketch_name: &str) -> Vec<ParsedError> {
    let pattern = format!(
        r".*?{}/(?<file>.+?\.ino):(?<row>[0-9]+):(?<col>[0-9]+):.*error:",
        regex::escape(sketch_name)
    );
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("Unable to build error pattern for sketch {}: {}", sketch_name, e);
            return Vec::new();
        }
    };

    re.captures_iter(stderr)
        .filter_map(|caps| {
            Some(ParsedError {
                file: caps.name("file")?.as_str().to_string(),
                row: caps.name("row")?.as_str().parse().ok()?,
                column: caps.name("col")?.as_str().parse().ok()?,
            })
        })
        .collect()
}
