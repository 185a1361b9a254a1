//! Cloud-init template rendering: `{{name}}` textual substitution,
//! base64 encoding, and Nova's 65535-byte `user_data` limit.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudInitError {
    #[error("encoded user_data is {0} bytes, exceeds the 65535-byte provider limit")]
    TooLarge(usize),
}

/// Replaces every `{{key}}` in `content` with its value from `variables`.
/// Unresolved placeholders are logged at warn and left in the output
/// rather than failing the render.
#[must_use]
pub fn render_template(content: &str, variables: &[(&str, &str)]) -> String {
    let mut rendered = content.to_string();
    for (key, value) in variables {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }

    for remaining in find_placeholders(&rendered) {
        tracing::warn!(placeholder = %remaining, "unresolved cloud-init placeholder");
    }

    rendered
}

fn find_placeholders(content: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else { break };
        let end = start + end;
        found.push(rest[start + 2..end].trim().to_string());
        rest = &rest[end + 2..];
    }
    found
}

/// Base64-encodes rendered cloud-init content for providers that
/// require it (e.g. Nova's `user_data`), rejecting payloads past the
/// 65535-byte limit.
pub fn encode_user_data(rendered_content: &str) -> Result<String, CloudInitError> {
    let encoded = STANDARD.encode(rendered_content.as_bytes());
    if encoded.len() > 65535 {
        return Err(CloudInitError::TooLarge(encoded.len()));
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_and_encodes() {
        let rendered = render_template("#cloud-config\nhostname: {{name}}\n", &[("name", "vpn-01")]);
        assert_eq!(rendered, "#cloud-config\nhostname: vpn-01\n");
        let encoded = encode_user_data(&rendered).unwrap();
        assert_eq!(
            String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap(),
            rendered
        );
    }

    #[test]
    fn leaves_unresolved_placeholders_and_warns() {
        let rendered = render_template("hostname: {{name}}\nowner: {{owner}}\n", &[("name", "vpn-01")]);
        assert_eq!(rendered, "hostname: vpn-01\nowner: {{owner}}\n");
    }

    #[test]
    fn rejects_oversized_payload() {
        let huge = "a".repeat(70_000);
        assert!(matches!(encode_user_data(&huge), Err(CloudInitError::TooLarge(_))));
    }
}
