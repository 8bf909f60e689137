//! Support code for the `sorcer` binary: model files and the built-in
//! arithmetic providers they are evaluated against.

pub mod model_file;
pub mod providers;

pub use model_file::ModelFile;

/// Parse a `name=value` command-line assignment such as `mFi1=multiply`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}
