//! Transport encoding for the GitHub contents API.
//!
//! GitHub returns file bodies as standard base64 wrapped at 60 columns and
//! accepts unwrapped base64 on write.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::github::GithubError;

pub fn encode_content(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn decode_content(encoded: &str) -> Result<String, GithubError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_multibyte_and_newlines() {
        let text = "fn main() {\n    println!(\"héllo, 世界 🚀\");\n}\n\n// ünïcødé\r\n";
        let encoded = encode_content(text);
        assert!(!encoded.contains('\n'));
        assert_eq!(decode_content(&encoded).unwrap(), text);
    }

    #[test]
    fn test_round_trip_empty() {
        assert_eq!(encode_content(""), "");
        assert_eq!(decode_content("").unwrap(), "");
    }

    #[test]
    fn test_decode_accepts_github_line_wrapping() {
        let text = "x".repeat(200);
        let encoded = encode_content(&text);
        let wrapped: String = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(wrapped.contains('\n'));
        assert_eq!(decode_content(&format!("{}\n", wrapped)).unwrap(), text);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_content("not base64!!"),
            Err(GithubError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_utf8() {
        let encoded = STANDARD.encode([0xff, 0xfe, 0xfd]);
        assert!(matches!(decode_content(&encoded), Err(GithubError::Utf8(_))));
    }
}
