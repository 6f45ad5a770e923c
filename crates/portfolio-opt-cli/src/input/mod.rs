pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load the request from `--input`, or from piped stdin.
pub fn read_request<T: DeserializeOwned>(
    path: Option<&str>,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        file::read_json(path)
    } else if let Some(request) = stdin::read_piped()? {
        Ok(request)
    } else {
        Err("No request given: pass --input <file.json> or pipe JSON on stdin".into())
    }
}
