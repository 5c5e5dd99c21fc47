//! `@name` mention extraction.

/// Mentioned names in first-appearance order, lowercased and deduplicated.
///
/// A mention is `@` at the start of the text or after a character that is
/// not alphanumeric, followed by letters, digits, `_` or `-`. Addresses such
/// as `dana@example.com` are therefore not mentions.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = content.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = prev.is_none_or(|p| !p.is_alphanumeric());
        prev = Some(c);
        if c != '@' || !at_boundary {
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while let Some(&(j, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' || n == '-' {
                end = j + n.len_utf8();
                prev = Some(n);
                chars.next();
            } else {
                break;
            }
        }

        let name = content[start..end].trim_end_matches('-').to_ascii_lowercase();
        if !name.is_empty() && !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_appearance_order_and_dedup() {
        assert_eq!(
            extract_mentions("@coder and @Researcher, then @coder again"),
            vec!["coder", "researcher"]
        );
    }

    #[test]
    fn trailing_punctuation_is_not_part_of_the_name() {
        assert_eq!(extract_mentions("thanks @writer!"), vec!["writer"]);
        assert_eq!(extract_mentions("(@analyst)"), vec!["analyst"]);
        assert_eq!(extract_mentions("ping @lead-"), vec!["lead"]);
    }

    #[test]
    fn email_addresses_are_ignored() {
        assert!(extract_mentions("mail dana@example.com").is_empty());
        assert!(extract_mentions("just an @ sign").is_empty());
    }
}
