//! HTTP validator encoding: dates for `If-Modified-Since`/`Last-Modified` and
//! entity tags for `If-None-Match`/`ETag`.

use chrono::{DateTime, NaiveDateTime, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Format a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(IMF_FIXDATE).to_string()
}

/// Parse any of the three HTTP date forms. Returns `None` for anything else.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    [RFC_850, ASCTIME]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Strip surrounding double quotes from an `ETag` header value.
///
/// Returns `None` for an empty value.
pub fn unquote_etag(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let inner = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value);
    Some(inner.to_string())
}

/// Quote a stored etag for `If-None-Match`. Values already carrying quotes
/// (weak validators such as `W/"x"`) are sent as they are.
pub fn quote_etag(etag: &str) -> String {
    if etag.contains('"') {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}
