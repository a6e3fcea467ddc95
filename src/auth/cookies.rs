//! Cookie records, the Netscape cookie file format, and `Set-Cookie` parsing.
//!
//! The jar file uses the Netscape HTTP cookie format (7 TAB-separated fields
//! per line). HTTP-only cookies carry the `#HttpOnly_` domain prefix used by
//! curl so that every attribute survives a save/load cycle.

use std::fmt;
use std::io::{BufRead, Write};
use std::time::UNIX_EPOCH;

use tracing::{debug, instrument, warn};
use url::Url;

/// Header line written at the top of every jar file.
pub const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single stored cookie.
///
/// The value field is redacted in Debug output to prevent accidental logging
/// of session credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Domain without a leading dot, lowercased.
    pub domain: String,
    /// When `true` the cookie only matches the exact host.
    pub host_only: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Whether the cookie was marked `HttpOnly`.
    pub http_only: bool,
    /// Unix timestamp for expiry; `None` is a session cookie.
    pub expires: Option<i64>,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    value: String,
}

impl Cookie {
    /// Creates a host-only session cookie for `domain` with path `/`.
    #[must_use]
    pub fn new(domain: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            domain: normalize_domain(&domain.into()),
            host_only: true,
            path: "/".to_string(),
            secure: false,
            http_only: false,
            expires: None,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive, avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the cookie has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Whether this cookie should be attached to a request for `url` at `now`.
    ///
    /// The host must equal the cookie domain (or end with `.domain` unless the
    /// cookie is host-only), the request path must start with the cookie path,
    /// secure cookies require a TLS scheme, and the cookie must not be expired.
    #[must_use]
    pub fn matches(&self, url: &Url, now: i64) -> bool {
        if self.is_expired(now) {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        let secure_ok = !self.secure || matches!(url.scheme(), "https" | "wss");
        domain_ok && url.path().starts_with(&self.path) && secure_ok
    }

    /// Renders the `name=value` pair used in a `Cookie` request header.
    #[must_use]
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("domain", &self.domain)
            .field("host_only", &self.host_only)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors that can occur while reading a cookie jar file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// The offending line content (value redacted).
        content: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading or writing the cookie file.
    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of parsing a cookie file, including successfully parsed cookies
/// and any warnings about malformed lines.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Successfully parsed cookies.
    pub cookies: Vec<Cookie>,
    /// Warnings for malformed lines (line number and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file from a buffered reader.
///
/// Each data line must contain exactly 7 TAB-separated fields:
/// `domain`, `include-subdomains`, `path`, `secure`, `expires`, `name`, `value`.
/// A domain prefixed with `#HttpOnly_` marks an HTTP-only cookie; any other
/// line starting with `#` is a comment.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure. Malformed lines are collected
/// as warnings rather than failing the whole parse.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParseResult, CookieError> {
    let mut result = ParseResult::default();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        // Only strip line terminators; an empty value leaves a trailing TAB.
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            continue;
        }

        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        match parse_cookie_line(line, line_number, http_only) {
            Ok(cookie) => {
                debug!(
                    line = line_number,
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "parsed cookie"
                );
                result.cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                result.warnings.push((line_number, e.to_string()));
            }
        }
    }

    Ok(result)
}

/// Writes cookies in Netscape format, header line first.
///
/// # Errors
///
/// Returns any I/O error from the writer.
pub fn write_netscape_cookies(mut writer: impl Write, cookies: &[Cookie]) -> std::io::Result<()> {
    writeln!(writer, "{NETSCAPE_HEADER}")?;
    for cookie in cookies {
        writeln!(writer, "{}", format_cookie_line(cookie))?;
    }
    writer.flush()
}

/// Formats one cookie as a Netscape line (without trailing newline).
#[must_use]
pub fn format_cookie_line(cookie: &Cookie) -> String {
    let prefix = if cookie.http_only { HTTP_ONLY_PREFIX } else { "" };
    let domain = if cookie.host_only {
        cookie.domain.clone()
    } else {
        format!(".{}", cookie.domain)
    };
    format!(
        "{prefix}{domain}\t{}\t{}\t{}\t{}\t{}\t{}",
        bool_field(!cookie.host_only),
        cookie.path,
        bool_field(cookie.secure),
        cookie.expires.unwrap_or(0),
        cookie.name,
        cookie.value
    )
}

fn bool_field(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

/// Parses a single cookie line into a `Cookie`.
fn parse_cookie_line(line: &str, line_number: usize, http_only: bool) -> Result<Cookie, CookieError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() != 7 {
        return Err(invalid_line(
            line,
            line_number,
            format!("expected 7 TAB-separated fields, found {}", fields.len()),
        ));
    }

    let domain = normalize_domain(fields[0]);
    let include_subdomains = parse_bool_field(fields[1], "include-subdomains", line_number, line)?;
    let path = fields[2].to_string();
    let secure = parse_bool_field(fields[3], "secure", line_number, line)?;

    let expires = fields[4].parse::<i64>().map_err(|_| {
        invalid_line(
            line,
            line_number,
            format!("expires field must be an integer, got '{}'", fields[4]),
        )
    })?;

    let name = fields[5].to_string();
    let value = fields[6].to_string();

    if domain.is_empty() {
        return Err(invalid_line(line, line_number, "domain field is empty".to_string()));
    }

    if name.is_empty() {
        return Err(invalid_line(line, line_number, "cookie name field is empty".to_string()));
    }

    Ok(Cookie {
        domain,
        host_only: !include_subdomains,
        path,
        secure,
        http_only,
        expires: (expires != 0).then_some(expires),
        name,
        value,
    })
}

/// Parses a `TRUE`/`FALSE` string field.
fn parse_bool_field(
    value: &str,
    field_name: &str,
    line_number: usize,
    line: &str,
) -> Result<bool, CookieError> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(invalid_line(
            line,
            line_number,
            format!("{field_name} field must be TRUE or FALSE, got '{value}'"),
        )),
    }
}

fn invalid_line(line: &str, line_number: usize, reason: String) -> CookieError {
    CookieError::InvalidLine {
        line_number,
        content: redact_line_for_error(line),
        reason,
    }
}

/// Redacts cookie value (7th field) from a line for safe error messages.
fn redact_line_for_error(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        line.to_string()
    }
}

/// Parses one `Set-Cookie` header value received for `request_url`.
///
/// Returns `None` for directives without a `name=value` pair, with an empty
/// name, with control characters (tabs included) in the name or value, or
/// whose `Domain` attribute does not cover the request host. The
/// expiry comes from `Max-Age` (relative to `now`) when present, otherwise
/// from `Expires`.
#[must_use]
pub fn parse_set_cookie(header: &str, request_url: &Url, now: i64) -> Option<Cookie> {
    let host = request_url.host_str()?.to_ascii_lowercase();
    let mut parts = header.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    // The jar format is tab-separated; such a cookie could not be reloaded.
    if name.chars().chain(value.chars()).any(char::is_control) {
        debug!(name, "rejecting cookie with control characters");
        return None;
    }

    let mut cookie = Cookie::new(host.clone(), name, value);
    let mut max_age: Option<i64> = None;
    let mut expires: Option<i64> = None;

    for attribute in parts {
        let (key, attr_value) = match attribute.split_once('=') {
            Some((key, attr_value)) => (key.trim(), attr_value.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = normalize_domain(attr_value);
                if domain.is_empty() {
                    continue;
                }
                if !domain_matches(&host, &domain) {
                    debug!(%host, %domain, name, "rejecting cookie for foreign domain");
                    return None;
                }
                cookie.domain = domain;
                cookie.host_only = false;
            }
            "path" if attr_value.starts_with('/') => cookie.path = attr_value.to_string(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "max-age" => max_age = attr_value.parse::<i64>().ok(),
            "expires" => expires = parse_cookie_date(attr_value),
            _ => {}
        }
    }

    cookie.expires = match (max_age, expires) {
        (Some(seconds), _) => Some(now.saturating_add(seconds)),
        (None, expires) => expires,
    };
    Some(cookie)
}

/// Parses an `Expires` attribute into Unix seconds.
///
/// Accepts RFC 7231 dates plus the dashed `Wed, 09-Jun-2021 10:18:14 GMT`
/// form many servers still emit.
fn parse_cookie_date(raw: &str) -> Option<i64> {
    let parsed = httpdate::parse_http_date(raw)
        .or_else(|_| httpdate::parse_http_date(&raw.replace('-', " ")))
        .ok()?;
    Some(match parsed.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    })
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Exact or dot-suffix match of `host` against `domain`.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
