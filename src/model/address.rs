//! RFC 5322 address parsing and search tokens for addresses.

use serde::{Deserialize, Serialize};

/// A parsed email address.
///
/// - `"Ana Ruiz <ana@example.com>"` → `display_name = "Ana Ruiz"`, `address = "ana@example.com"`
/// - `"ana@example.com"` → `display_name = ""`, `address = "ana@example.com"`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub display_name: String,
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address. Unparseable input is kept whole as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated list, honoring quoted and bracketed commas.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    results.push(Self::parse(&std::mem::take(&mut current)));
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        results.push(Self::parse(&current));

        results.retain(|a| !a.address.is_empty());
        results
    }

    /// Search tokens: the full address, local part, domain, every domain
    /// label and each display-name word, lowercased and deduplicated in
    /// first-seen order.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        let mut push = |t: &str| {
            let t = t.trim().to_lowercase();
            if !t.is_empty() && !tokens.contains(&t) {
                tokens.push(t);
            }
        };

        push(&self.address);
        if let Some((local, domain)) = self.address.rsplit_once('@') {
            push(local);
            push(domain);
            for label in domain.split('.') {
                push(label);
            }
        }
        for word in self
            .display_name
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
        {
            push(word);
        }
        tokens
    }

    /// `"Display Name <address>"`, or just the address.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Tokens for every address in a creator header value, space-joined.
pub fn address_tokens(raw: &str) -> String {
    EmailAddress::parse_list(raw)
        .iter()
        .flat_map(EmailAddress::tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let bare = EmailAddress::parse("user@example.com");
        assert_eq!(bare.address, "user@example.com");
        assert_eq!(bare.display_name, "");

        let named = EmailAddress::parse("\"Last, First\" <user@example.com>");
        assert_eq!(named.address, "user@example.com");
        assert_eq!(named.display_name, "Last, First");
        assert_eq!(named.display(), "Last, First <user@example.com>");
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = EmailAddress::parse_list("\"Last, First\" <a@b.com>, other@c.com, ");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "Last, First");
        assert_eq!(list[1].address, "other@c.com");
    }

    #[test]
    fn test_tokens() {
        let addr = EmailAddress::parse("Ana Ruiz <Ana.Ruiz@Mail.Example.com>");
        assert_eq!(
            addr.tokens(),
            vec![
                "ana.ruiz@mail.example.com",
                "ana.ruiz",
                "mail.example.com",
                "mail",
                "example",
                "com",
                "ana",
                "ruiz",
            ]
        );
    }

    #[test]
    fn test_address_tokens_for_list() {
        let tokens = address_tokens("a@x.org, b@x.org");
        assert_eq!(tokens, "a@x.org a x.org x org b@x.org b x.org x org");
    }

    #[test]
    fn test_address_tokens_empty() {
        assert_eq!(address_tokens(""), "");
    }
}
