use std::collections::BTreeSet;

/// Case-fold and split on word boundaries.
///
/// Every non-empty token survives, so single-character discriminators such as
/// the `2` in "type 2 diabetes" or the `k` in "vitamin k" still route.
#[must_use]
pub fn normalize_terms(value: &str) -> BTreeSet<String> {
    value
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Union of [`normalize_terms`] over several inputs.
pub fn normalize_all<'a, I>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut terms = BTreeSet::new();
    for value in values {
        terms.extend(normalize_terms(value));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_are_case_folded_and_split_on_punctuation() {
        let terms = normalize_terms("Neutropenic-Fever: ANC<500, fever!");
        let expected = ["anc", "fever", "neutropenic", "500"]
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        assert_eq!(terms, expected);
    }

    #[test]
    fn single_character_tokens_are_kept() {
        let terms = normalize_terms("Type 2 Diabetes, Hepatitis B, vitamin K");
        for term in ["type", "2", "diabetes", "hepatitis", "b", "vitamin", "k"] {
            assert!(terms.contains(term), "missing {term} in {terms:?}");
        }
    }

    #[test]
    fn separators_alone_yield_no_terms() {
        assert!(normalize_terms("   ").is_empty());
        assert!(normalize_terms("-- / ,").is_empty());
        assert!(normalize_all(["", "!!"]).is_empty());
    }

    #[test]
    fn non_ascii_letters_fold_too() {
        let terms = normalize_terms("Ödem ÄRZTE");
        assert!(terms.contains("ödem"));
        assert!(terms.contains("ärzte"));
    }
}
