//! Attribution (artist string) normalization.

/// Remove duplicate names from an attribution string.
///
/// ` and ` and ` & ` are treated as separators alongside `,`. Names compare
/// case-insensitively, keep their first position, and are rendered in title case.
pub fn dedupe_attribution(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let normalized = raw.replace(" and ", ",").replace(" & ", ",");

    let mut seen: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for part in normalized.split(',') {
        let name = part.trim().to_lowercase();
        if name.is_empty() || seen.contains(&name) {
            continue;
        }
        names.push(title_case(&name));
        seen.push(name);
    }

    names.join(", ")
}

/// Upper-case every letter that follows a non-letter, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}
