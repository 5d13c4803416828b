//! Data-driven intent matchers.
//!
//! Pure functions over `(text, candidates)`; the turn controller only calls
//! them, it never inspects transcripts itself.

/// Lowercases and strips accents and punctuation so that "José," matches
/// "jose".
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            c if c.is_alphanumeric() || c == '\'' => c,
            _ => ' ',
        };
        out.push(c);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finds which candidate first name the user asked for.
///
/// Returns the first candidate, in candidate order, that occurs in the
/// transcript as a case-insensitive substring, spelled as in `candidates`.
pub fn extract_name_preference(text: &str, candidates: &[String]) -> Option<String> {
    let haystack = normalize(text);
    candidates
        .iter()
        .find(|candidate| {
            let needle = normalize(candidate);
            !needle.is_empty() && haystack.contains(&needle)
        })
        .cloned()
}

/// Whether the transcript is a "nothing more to add" reply.
pub fn is_no_more_response(text: &str, phrases: &[String]) -> bool {
    let haystack = normalize(text);
    !haystack.is_empty()
        && phrases.iter().any(|phrase| {
            let needle = normalize(phrase);
            !needle.is_empty() && haystack.contains(&needle)
        })
}

/// Outcome of one name preference attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    /// The user named one of the candidates.
    Chosen(String),
    /// Attempts ran out; the first candidate is used.
    Defaulted(String),
    /// No match yet; ask again.
    Unresolved,
}

/// Resolves the name preference for the `attempt`-th try (1-based).
///
/// An unmatched reply is re-asked until `max_attempts` is reached, after
/// which the first candidate is used.
pub fn resolve_name_preference(
    text: &str,
    candidates: &[String],
    attempt: u32,
    max_attempts: u32,
) -> NameResolution {
    if let Some(name) = extract_name_preference(text, candidates) {
        return NameResolution::Chosen(name);
    }
    match candidates.first() {
        Some(first) if attempt >= max_attempts.max(1) => NameResolution::Defaulted(first.clone()),
        _ => NameResolution::Unresolved,
    }
}
