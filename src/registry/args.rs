use url::form_urlencoded;

/// Looks up `name` in a `key=value&...` buffer.
///
/// Keys and values are percent-decoded before comparison; `+` stays a
/// literal plus. Returns `None` when the key is absent.
///
/// ```
/// # use wxbridge::registry::args::find_arg;
/// assert_eq!(find_arg("name=foo&other=bar", "other").as_deref(), Some("bar"));
/// assert_eq!(find_arg("name=foo", "missing"), None);
/// ```
pub fn find_arg(vars: &str, name: &str) -> Option<String> {
    let vars = vars.replace('+', "%2B");
    form_urlencoded::parse(vars.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Cuts `text` to at most `max` bytes on a character boundary.
pub(crate) fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
