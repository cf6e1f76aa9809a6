use std::collections::HashSet;

/// Trim and collapse runs of whitespace so downstream stages see one
/// canonical form of the query text.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric tokens. Underscores survive so identifiers in
/// technical passages keep their shape.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Jaccard overlap of token sets, in [0, 1]. Similarity fallback for chunks
/// without embeddings.
pub fn lexical_overlap(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Strip a surrounding markdown code fence, if present. Generated
/// hypothetical passages often arrive fenced; the fence would poison
/// embeddings and lexical matching.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines = trimmed.lines();
    // Opening fence, possibly with a language tag
    lines.next();
    let mut body: Vec<&str> = lines.collect();
    if let Some(last) = body.last() {
        if last.trim_start().starts_with("```") {
            body.pop();
        }
    }
    body.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("  hello   world  ", "hello world"; "collapses inner runs")]
    #[test_case("one\ntwo\tthree", "one two three"; "newlines and tabs")]
    #[test_case("already clean", "already clean"; "no-op")]
    fn normalize_query_cases(input: &str, expected: &str) {
        assert_eq!(normalize_query(input), expected);
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        let tokens = tokenize("Retry the HTTP_CLIENT, twice!");
        assert_eq!(tokens, vec!["retry", "the", "http_client", "twice"]);
    }

    #[test]
    fn lexical_overlap_is_symmetric_and_bounded() {
        let a = "rate limiting for the gateway";
        let b = "gateway rate limiting policy";
        let ab = lexical_overlap(a, b);
        let ba = lexical_overlap(b, a);
        assert!((ab - ba).abs() < f32::EPSILON);
        assert!(ab > 0.0 && ab <= 1.0);
        assert_eq!(lexical_overlap("", "anything"), 0.0);
    }

    #[test]
    fn identical_texts_overlap_fully() {
        let s = "exactly the same words";
        assert!((lexical_overlap(s, s) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn strip_code_fences_removes_fenced_wrapper() {
        let fenced = "```markdown\nSome hypothetical answer.\n```";
        assert_eq!(strip_code_fences(fenced), "Some hypothetical answer.");
    }

    #[test]
    fn strip_code_fences_passes_plain_text_through() {
        assert_eq!(strip_code_fences("  plain text  "), "plain text");
    }

    #[test]
    fn strip_code_fences_handles_missing_closer() {
        let fenced = "```\nunterminated body";
        assert_eq!(strip_code_fences(fenced), "unterminated body");
    }
}
