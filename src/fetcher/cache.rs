//! `Cache-Control` handling for feed responses.

/// Extracts `max-age` from a `Cache-Control` value.
///
/// The first directive that parses wins; other directives are ignored.
pub fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control
        .split(',')
        .map(str::trim)
        .filter_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().trim_matches('"').parse::<u32>().ok()
        })
        .map(i64::from)
        .next()
}
