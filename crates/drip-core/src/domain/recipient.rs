//! Recipient address handling shared by the build step and the send gate.

use super::email::SendType;

/// Normalize a raw recipient: trim, drop a `mailto:` scheme and any `?query`
/// suffix, lowercase. Returns `None` when nothing address-shaped remains.
pub fn normalize_recipient(raw: &str) -> Option<String> {
    let mut addr = raw.trim();
    if let Some(scheme) = addr.get(..7)
        && scheme.eq_ignore_ascii_case("mailto:")
    {
        addr = &addr[7..];
    }
    if let Some((head, _)) = addr.split_once('?') {
        addr = head;
    }
    let addr = addr.trim().to_ascii_lowercase();

    match addr.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Some(addr),
        _ => None,
    }
}

/// Domain part of an already normalized address.
pub fn recipient_domain(addr: &str) -> Option<&str> {
    addr.rsplit_once('@').map(|(_, d)| d)
}

/// Send type for a new record: recipients at allow-listed friendly domains
/// get `friendly`, everyone else `cold`.
pub fn classify_send_type(recipient: &str, friendly_domains: &[String]) -> SendType {
    let friendly = normalize_recipient(recipient)
        .as_deref()
        .and_then(recipient_domain)
        .is_some_and(|domain| {
            friendly_domains
                .iter()
                .any(|f| domain_matches(domain, f))
        });
    if friendly {
        SendType::friendly()
    } else {
        SendType::cold()
    }
}

/// `domain` equals `rule` or is a subdomain of it.
pub(crate) fn domain_matches(domain: &str, rule: &str) -> bool {
    let rule = rule.trim().trim_start_matches('@').to_ascii_lowercase();
    if rule.is_empty() {
        return false;
    }
    domain == rule || domain.ends_with(&format!(".{rule}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("alex@example.com", Some("alex@example.com"))]
    #[case::mailto("mailto:Alex@Example.com", Some("alex@example.com"))]
    #[case::mailto_with_query("MAILTO:alex@example.com?subject=hi", Some("alex@example.com"))]
    #[case::whitespace("  alex@example.com \n", Some("alex@example.com"))]
    #[case::no_at("alex.example.com", None)]
    #[case::no_local("@example.com", None)]
    #[case::no_tld("alex@localhost", None)]
    #[case::empty("", None)]
    fn normalizes_recipients(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_recipient(raw).as_deref(), expected);
    }

    #[rstest]
    #[case::listed("sam@partner.io", SendType::friendly())]
    #[case::subdomain("sam@mail.partner.io", SendType::friendly())]
    #[case::lookalike("sam@notpartner.io", SendType::cold())]
    #[case::unlisted("sam@stranger.com", SendType::cold())]
    #[case::garbage("not an address", SendType::cold())]
    fn classifies_by_friendly_domain(#[case] recipient: &str, #[case] expected: SendType) {
        let friendly = vec!["partner.io".to_string()];
        assert_eq!(classify_send_type(recipient, &friendly), expected);
    }
}
