//! Identifier naming and deterministic compression.
//!
//! Table and column names are composed from payload field paths
//! (`msg_execute_contract_7_group_member`), so deeply nested payloads can
//! exceed the store's identifier limit (63 bytes for Postgres). This
//! module provides the naming policy used everywhere a generated name is
//! produced:
//!
//! - [`snake`] normalizes payload keys to lower snake_case
//! - [`singular`] strips a trailing plural `s` before composition
//! - [`compress`] deterministically shortens a snake_case name
//! - [`fit`] applies compression only when a name would not fit
//!
//! Compression is *not* collision-free: two differently-structured long
//! names can compress to the same short name. Callers that issue DDL keep
//! a registry of fitted names and fail loudly on a collision.

/// Maximum identifier length accepted by the store (Postgres limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Deterministically compress a snake_case name.
///
/// Splits on `_`; a segment is kept verbatim when it parses as an
/// integer or is one of the last two segments, otherwise it is reduced
/// to its first character. Segments are concatenated without separators.
///
/// ```
/// use strata_core::names::compress;
/// assert_eq!(compress("msg_execute_contract_7_check_mint"), "mec7checkmint");
/// ```
pub fn compress(name: &str) -> String {
    let segments: Vec<&str> = name.split('_').collect();
    let count = segments.len();
    let mut short = String::with_capacity(name.len());

    for (i, segment) in segments.iter().enumerate() {
        if segment.parse::<i64>().is_ok() || i + 2 >= count {
            short.push_str(segment);
        } else if let Some(first) = segment.chars().next() {
            short.push(first);
        }
    }

    short
}

/// Return `name` unchanged when it fits the store identifier limit,
/// otherwise its compressed form.
///
/// Every generated identifier passes through this before reaching the
/// store, so short names stay readable while deep ones shrink.
pub fn fit(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LEN {
        name.to_string()
    } else {
        compress(name)
    }
}

/// Strip a single trailing `s`, turning a plural category or field name
/// into the singular used for table composition (`votes` -> `vote`).
pub fn singular(name: &str) -> &str {
    name.strip_suffix('s').unwrap_or(name)
}

/// Normalize a payload key to lower snake_case (`codeId` -> `code_id`).
///
/// Spaces and dashes become underscores; an uppercase letter starts a
/// new segment unless it continues an acronym run.
pub fn snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if ch == ' ' || ch == '-' || ch == '_' {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            continue;
        }

        if ch.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_numeric());
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if (prev_lower || (i > 0 && next_lower)) && !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }

    out
}

/// Compose a child name from a context and a key: `{context}_{key}`.
pub fn child(context: &str, key: &str) -> String {
    format!("{context}_{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_keeps_integers_and_tail() {
        // Integer segments and the last two segments survive verbatim.
        assert_eq!(
            compress("msg_instantiate_contract_42_group_instantiate_new_voter"),
            "mic42ginewvoter"
        );
        assert_eq!(compress("msg_execute_contract_7_check_mint"), "mec7checkmint");
    }

    #[test]
    fn test_compress_short_names_unchanged() {
        // One or two segments are all "last two", so nothing shrinks.
        assert_eq!(compress("sync"), "sync");
        assert_eq!(compress("tx_hash"), "txhash");
    }

    #[test]
    fn test_compress_deterministic() {
        let name = "msg_execute_contract_504_mint_batch_recipient";
        assert_eq!(compress(name), compress(name));
    }

    #[test]
    fn test_compress_reduces_length() {
        // Any name with >= 3 underscore-separated segments gets shorter.
        let names = [
            "msg_execute_contract_7_group_member",
            "a_b_c",
            "one_two_three_four_five",
        ];
        for name in names {
            assert!(compress(name).len() <= name.len(), "{name}");
        }
    }

    #[test]
    fn test_fit_keeps_short_names() {
        assert_eq!(fit("msg_execute_contract_7"), "msg_execute_contract_7");
    }

    #[test]
    fn test_fit_compresses_long_names() {
        let long = format!("{}_group_member", "segment_".repeat(10) + "base");
        assert!(long.len() > MAX_IDENTIFIER_LEN);
        let fitted = fit(&long);
        assert!(fitted.len() <= MAX_IDENTIFIER_LEN);
        assert_eq!(fitted, compress(&long));
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("votes"), "vote");
        assert_eq!(singular("msg_execute_contracts"), "msg_execute_contract");
        assert_eq!(singular("amount"), "amount");
        // Only one trailing s is stripped.
        assert_eq!(singular("address"), "addres");
    }

    #[test]
    fn test_snake() {
        assert_eq!(snake("codeId"), "code_id");
        assert_eq!(snake("txHash"), "tx_hash");
        assert_eq!(snake("already_snake"), "already_snake");
        assert_eq!(snake("Recipient"), "recipient");
        assert_eq!(snake("with space"), "with_space");
    }

    #[test]
    fn test_child_composition() {
        assert_eq!(child("msg_execute_contract_7", "vote"), "msg_execute_contract_7_vote");
    }
}
