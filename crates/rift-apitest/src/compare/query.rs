//! Order-independent, duplicate-tolerant matching of query parameter values.

use super::regex_directive;
use regex::Regex;

/// Check that `actual` holds the same values as `expected`, in any order.
///
/// Expected items may be literals or `$matchRegexp(<pattern>)` directives. Matching is
/// greedy first-fit: the first expected/actual pair that matches is consumed and the
/// scan restarts, so an ambiguous pattern can claim an item a later literal needed.
///
/// Returns `Ok(false)` on any mismatch (including differing lengths); `Err` only when a
/// directive holds a malformed pattern.
pub fn compare_query(expected: &[String], actual: &[String]) -> Result<bool, regex::Error> {
    if expected.len() != actual.len() {
        return Ok(false);
    }

    let mut expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    let mut actual: Vec<&str> = actual.iter().map(String::as_str).collect();

    while !expected.is_empty() {
        let mut hit = None;

        'outer: for (i, expected_value) in expected.iter().enumerate() {
            let pattern = match regex_directive(expected_value) {
                Some(pattern) => Some(Regex::new(pattern)?),
                None => None,
            };
            for (j, actual_value) in actual.iter().enumerate() {
                let found = match &pattern {
                    Some(rx) => rx.is_match(actual_value),
                    None => expected_value == actual_value,
                };
                if found {
                    hit = Some((i, j));
                    break 'outer;
                }
            }
        }

        let Some((i, j)) = hit else {
            return Ok(false);
        };
        expected.swap_remove(i);
        actual.swap_remove(j);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_order_independent() {
        assert!(compare_query(&strings(&["cake", "tea"]), &strings(&["tea", "cake"])).unwrap());
    }

    #[test]
    fn test_regex_directive_matches_any_position() {
        assert!(compare_query(
            &strings(&["tea", "$matchRegexp(^c\\w+)"]),
            &strings(&["cake", "tea"])
        )
        .unwrap());
    }

    #[test]
    fn test_length_mismatch_is_not_an_error() {
        assert!(!compare_query(&strings(&["a"]), &strings(&["a", "b"])).unwrap());
    }

    #[test]
    fn test_duplicates_must_be_matched_individually() {
        assert!(compare_query(&strings(&["a", "a", "b"]), &strings(&["a", "b", "a"])).unwrap());
        assert!(!compare_query(&strings(&["a", "a", "b"]), &strings(&["a", "b", "b"])).unwrap());
    }

    #[test]
    fn test_unmatched_value() {
        assert!(!compare_query(&strings(&["cake", "tea"]), &strings(&["cake", "beer"])).unwrap());
    }

    #[test]
    fn test_malformed_directive_is_an_error() {
        assert!(compare_query(&strings(&["$matchRegexp([a-)"]), &strings(&["a"])).is_err());
    }

    #[test]
    fn test_greedy_first_fit_can_miss_a_valid_assignment() {
        // The directive claims "ab" first, leaving "a" without a partner for "ab".
        let expected = strings(&["$matchRegexp(^a)", "ab"]);
        let actual = strings(&["ab", "a"]);
        assert!(!compare_query(&expected, &actual).unwrap());
    }
}
