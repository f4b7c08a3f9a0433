//! Messaging-channel reply grammar
//!
//! The only inbound text the core interprets is the confirmation reply:
//! `YES <order-id-prefix>` or `NO <order-id-prefix>`, where the prefix is
//! at least eight hex characters of the responder's own order id. Anything
//! else is a parse failure the gateway reports back to the sender.

/// A successfully parsed confirmation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationReply {
    pub accepted: bool,
    pub order_prefix: String,
}

/// Parse a free-text reply. Returns `None` when the text does not match
/// the grammar.
pub fn parse_reply(text: &str) -> Option<ConfirmationReply> {
    let trimmed = text.trim();
    let (verb, rest) = trimmed.split_once(char::is_whitespace)?;

    let accepted = match verb {
        "YES" => true,
        "NO" => false,
        _ => return None,
    };

    let rest = rest.trim_start();
    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        .collect();

    if token.len() < 8 {
        return None;
    }

    // The token must end at a word boundary.
    match rest[token.len()..].chars().next() {
        Some(c) if c.is_ascii_alphanumeric() => return None,
        _ => {}
    }

    Some(ConfirmationReply {
        accepted,
        order_prefix: token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_with_prefix() {
        let reply = parse_reply("YES 1a2b3c4d").unwrap();
        assert!(reply.accepted);
        assert_eq!(reply.order_prefix, "1a2b3c4d");
    }

    #[test]
    fn test_parse_no_with_long_prefix_and_trailer() {
        let reply = parse_reply("NO 1a2b3c4d5e6f please").unwrap();
        assert!(!reply.accepted);
        assert_eq!(reply.order_prefix, "1a2b3c4d5e6f");
    }

    #[test]
    fn test_rejects_lowercase_verb() {
        assert!(parse_reply("yes 1a2b3c4d").is_none());
    }

    #[test]
    fn test_rejects_short_prefix() {
        assert!(parse_reply("YES 1a2b3c").is_none());
    }

    #[test]
    fn test_rejects_non_hex_token() {
        assert!(parse_reply("YES order123").is_none());
        // Hex run terminated by a letter is not a word boundary.
        assert!(parse_reply("YES 1a2b3c4dzz").is_none());
    }

    #[test]
    fn test_rejects_missing_token() {
        assert!(parse_reply("YES").is_none());
        assert!(parse_reply("MAYBE 1a2b3c4d").is_none());
    }

    #[test]
    fn test_leading_whitespace_tolerated() {
        assert!(parse_reply("  NO 0011aabb  ").is_some());
    }
}
