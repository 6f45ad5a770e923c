use serde::de::DeserializeOwned;
use std::io::{self, Read};

/// Request piped on stdin, or `None` when stdin is a terminal.
pub fn read_piped<T: DeserializeOwned>() -> Result<Option<T>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    parse_request(io::stdin().lock())
}

/// Blank input means no request; anything else must be a JSON request.
fn parse_request<T: DeserializeOwned, R: Read>(
    mut reader: R,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    let mut body = String::new();
    reader.read_to_string(&mut body)?;
    match body.trim() {
        "" => Ok(None),
        json => Ok(Some(serde_json::from_str(json)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_blank_input_is_no_request() {
        let parsed: Option<Value> = parse_request(" \n\t".as_bytes()).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_piped_request_is_parsed() {
        let parsed: Option<Value> =
            parse_request(r#"{"problem": {"risk_ceiling": 0.15}}"#.as_bytes()).unwrap();
        assert_eq!(parsed.unwrap()["problem"]["risk_ceiling"], 0.15);
    }

    #[test]
    fn test_malformed_request_is_an_error() {
        assert!(parse_request::<Value, _>("{not json".as_bytes()).is_err());
    }
}
