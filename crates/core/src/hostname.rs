/// Hostname of an incoming storefront request, kept in the two forms the resolver compares.
///
/// `normalized` is trimmed, lowercased and stripped of any port or trailing dot. It is the
/// value stored in and queried against the `stores` table. `bare` additionally drops one
/// leading `www.` and is only used when matching the static domain table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostName {
    normalized: String,
    bare: String,
}

impl HostName {
    pub fn parse(raw: &str) -> Self {
        let host = strip_port(raw.trim());
        let normalized = host.trim_end_matches('.').to_ascii_lowercase();
        let bare = normalized
            .strip_prefix("www.")
            .unwrap_or(&normalized)
            .to_string();

        Self { normalized, bare }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn bare(&self) -> &str {
        &self.bare
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

fn strip_port(value: &str) -> &str {
    if value.starts_with('[') {
        // IPv6 literal, keep the brackets.
        return match value.find(']') {
            Some(end) => &value[..=end],
            None => value,
        };
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => value,
    }
}
