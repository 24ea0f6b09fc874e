//! Reversible escaping of service names into DNS-label-safe strings.

const SAFE: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ESCAPE_CHAR: char = '-';

/// Keep `[a-z0-9]`; every other byte becomes `-XX` (lowercase hex).
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if SAFE.contains(&b) {
            out.push(b as char);
        } else {
            out.push(ESCAPE_CHAR);
            out.push_str(&format!("{b:02x}"));
        }
    }
    out
}

/// Inverse of [`escape`]. Returns `None` for input `escape` cannot produce.
pub fn unescape(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE_CHAR as u8 {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Expand `{servername}` and `{unescaped_servername}` in a name template.
/// Substitutions happen in one left-to-right pass, so placeholder text
/// inside the service name is never expanded again.
pub fn expand_template(template: &str, service_name: &str) -> String {
    const ESCAPED: &str = "{servername}";
    const UNESCAPED: &str = "{unescaped_servername}";
    let mut out = String::with_capacity(template.len() + service_name.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(ESCAPED) {
            out.push('-');
            out.push_str(&escape(service_name));
            rest = after;
        } else if let Some(after) = tail.strip_prefix(UNESCAPED) {
            out.push('-');
            out.push_str(service_name);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
