use log::warn;

/// Interpret a string value such as "1" or "no" as a boolean.
pub fn str_as_bool(s: &str) -> bool {
    match s {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => {
            warn!("Unrecognized boolean value \"{}\"", s);
            false
        }
    }
}

/// Split a configuration string such as `"fuse-axes=0 verbose=1"` into
/// `(key, value)` pairs.
///
/// Tokens without an `=` are reported and skipped.
pub fn config_pairs(config: &str) -> impl Iterator<Item = (&str, &str)> {
    config.split_ascii_whitespace().filter_map(|token| {
        let pair = token.split_once('=').map(|(k, v)| (k.trim(), v.trim()));
        if pair.is_none() {
            warn!("Ignoring option \"{}\" without a value", token);
        }
        pair
    })
}

#[cfg(test)]
mod tests {
    use varshape_testing::TestCases;

    use super::{config_pairs, str_as_bool};

    #[test]
    fn test_str_as_bool() {
        let cases = [
            ("1", true),
            ("yes", true),
            ("t", true),
            ("0", false),
            ("no", false),
            ("maybe", false),
        ];
        cases.test_each_value(|(s, expected)| {
            assert_eq!(str_as_bool(s), expected);
        });
    }

    #[test]
    fn test_config_pairs() {
        let pairs: Vec<_> = config_pairs(" fuse-axes=0  verbose verbose=1 ").collect();
        assert_eq!(pairs, [("fuse-axes", "0"), ("verbose", "1")]);
    }
}
