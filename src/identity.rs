//! File identity normalization.
//!
//! The ledger keys on a normalized form of the absolute file path rather
//! than the raw string: scanned-note filenames routinely pick up exotic
//! whitespace (non-breaking spaces from phone share sheets, narrow
//! no-break spaces from camera apps), and the same file must map to the
//! same ledger entry no matter which representation a given scan produced.

use unicode_normalization::UnicodeNormalization;

/// Normalize a path string into a stable file identity.
///
/// Applies Unicode NFKC folding, then collapses every maximal run of
/// whitespace into a single ASCII space. Case and path separators are
/// preserved. The function is total and idempotent:
/// `normalize(normalize(p)) == normalize(p)` for all inputs.
///
/// Must be applied on both the write path (`mark_processed`) and the read
/// path (`is_processed`); the ledger takes care of that itself.
pub fn normalize(path: &str) -> String {
    let folded: String = path.nfkc().collect();

    let mut out = String::with_capacity(folded.len());
    let mut in_whitespace = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push(' ');
                in_whitespace = true;
            }
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_path_unchanged() {
        assert_eq!(normalize("/brain-notes/work/receipt.jpg"), "/brain-notes/work/receipt.jpg");
    }

    #[test]
    fn nbsp_and_space_normalize_identically() {
        // U+202F narrow no-break space vs. a regular space.
        assert_eq!(normalize("/a\u{202f}b.jpg"), normalize("/a b.jpg"));
        // U+00A0 non-breaking space.
        assert_eq!(normalize("/a\u{a0}b.jpg"), normalize("/a b.jpg"));
    }

    #[test]
    fn whitespace_runs_collapse_to_one_space() {
        assert_eq!(normalize("/notes/a \t \u{a0} b.pdf"), "/notes/a b.pdf");
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "/a\u{202f}b.jpg",
            "/notes/ﬁle.pdf", // U+FB01 ligature, folded by NFKC
            "  /leading/run.png",
            "/brain-notes/work/receipt.jpg",
        ];
        for p in inputs {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", p);
        }
    }

    #[test]
    fn case_and_separators_preserved() {
        assert_eq!(normalize("/Notes/A.jpg"), "/Notes/A.jpg");
        assert_ne!(normalize("/notes/a.jpg"), normalize("/Notes/A.jpg"));
        assert_ne!(normalize("/a/b.jpg"), normalize("/a_b.jpg"));
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        // Fullwidth digits fold to ASCII under NFKC.
        assert_eq!(normalize("/scan\u{ff11}.png"), "/scan1.png");
    }
}
