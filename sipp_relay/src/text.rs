// Sanitizing of client-supplied text.
//
// Everything a client types is trimmed and HTML-escaped before the relay
// looks at it or echoes it to anyone else, so markup-style control sequences
// reach other clients as inert text. Display names go through the same path
// and fall back to `DEFAULT_NAME` when nothing is left.

/// Name assigned to clients whose requested name is blank.
pub const DEFAULT_NAME: &str = "Guest";

/// Escape the five HTML-significant characters: `& < > " '`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Trim surrounding whitespace, then escape.
pub fn sanitize(text: &str) -> String {
    escape_html(text.trim())
}

/// Turn a requested name into the display name used for the whole
/// connection.
pub fn display_name(requested: &str) -> String {
    let name = sanitize(requested);
    if name.is_empty() {
        DEFAULT_NAME.into()
    } else {
        name
    }
}
