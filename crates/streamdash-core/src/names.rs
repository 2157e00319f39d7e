//! Display-name normalization used to join records that share no stable id.

/// Lowercase, trim, strip one trailing period, collapse inner whitespace.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = lowered.strip_suffix('.').unwrap_or(&lowered);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-order-independent form of [`normalize_name`]: the words sorted
/// alphabetically and rejoined with single spaces.
pub fn normalize_name_signature(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    words.sort_unstable();
    words.join(" ")
}

/// How two names were found to refer to the same thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact,
    Signature,
}

pub fn match_names(a: &str, b: &str) -> Option<NameMatch> {
    if normalize_name(a) == normalize_name(b) {
        Some(NameMatch::Exact)
    } else if normalize_name_signature(a) == normalize_name_signature(b) {
        Some(NameMatch::Signature)
    } else {
        None
    }
}
