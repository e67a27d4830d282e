//! Session cookie persistence.
//!
//! Cookies are kept on disk in the Netscape cookie file format (7
//! TAB-separated fields per line), which browsers and curl can also read.
//! [`SessionJar`] plugs into reqwest as its cookie store and records every
//! accepted `Set-Cookie` so the session can be written back to that file.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{debug, instrument, warn};
use url::Url;

const FILE_HEADER: &str = "# Netscape HTTP Cookie File";

/// A single cookie in Netscape cookie file terms.
///
/// The value field is intentionally redacted in Debug output to prevent
/// accidental logging of session secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieLine {
    /// The domain the cookie belongs to (e.g., `.polito.it`).
    pub domain: String,
    /// Whether subdomains should match.
    pub tailmatch: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Creates a new cookie entry.
    #[must_use]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value. Avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the cookie has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires > 0 && self.expires <= now
    }

    fn key(&self) -> CookieKey {
        (
            self.domain.trim_start_matches('.').to_ascii_lowercase(),
            self.path.clone(),
            self.name.clone(),
        )
    }

    fn to_netscape_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            bool_field(self.tailmatch),
            self.path,
            bool_field(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

type CookieKey = (String, String, String);

/// Errors that can occur while reading or writing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// The offending line content, with the value redacted.
        content: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading or writing the cookie file.
    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// No valid cookies found in a non-empty file.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Result of parsing a cookie file.
#[derive(Debug)]
pub struct ParseResult {
    /// Successfully parsed cookies.
    pub cookies: Vec<CookieLine>,
    /// Warnings for malformed lines (line number and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file from a buffered reader.
///
/// Lines starting with `#` and blank lines are skipped. Malformed lines are
/// collected as warnings.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when a non-empty file yields zero valid cookies.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParseResult, CookieError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut non_blank_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        non_blank_lines += 1;

        match parse_cookie_line(line, line_number) {
            Ok(cookie) => cookies.push(cookie),
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                warnings.push((line_number, e.to_string()));
            }
        }
    }

    if cookies.is_empty() && non_blank_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(ParseResult { cookies, warnings })
}

/// Renders cookies as a Netscape cookie file.
#[must_use]
pub fn write_netscape_cookies(cookies: &[CookieLine]) -> String {
    let mut out = String::from(FILE_HEADER);
    out.push('\n');
    for cookie in cookies {
        out.push_str(&cookie.to_netscape_line());
        out.push('\n');
    }
    out
}

fn parse_cookie_line(line: &str, line_number: usize) -> Result<CookieLine, CookieError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let invalid = |reason: String| CookieError::InvalidLine {
        line_number,
        content: redact_line_for_error(line),
        reason,
    };

    if fields.len() != 7 {
        return Err(invalid(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        )));
    }

    let tailmatch = parse_bool_field(fields[1], "tailmatch").map_err(&invalid)?;
    let secure = parse_bool_field(fields[3], "secure").map_err(&invalid)?;
    let expires = fields[4].parse::<u64>().map_err(|_| {
        invalid(format!(
            "expires field must be a non-negative integer, got '{}'",
            fields[4]
        ))
    })?;

    if fields[0].is_empty() {
        return Err(invalid("domain field is empty".to_string()));
    }
    if fields[5].is_empty() {
        return Err(invalid("cookie name field is empty".to_string()));
    }

    Ok(CookieLine::new(
        fields[0].to_string(),
        tailmatch,
        fields[2].to_string(),
        secure,
        expires,
        fields[5].to_string(),
        fields[6].to_string(),
    ))
}

fn parse_bool_field(value: &str, field_name: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!(
            "{field_name} field must be TRUE or FALSE, got '{value}'"
        )),
    }
}

fn bool_field(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

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

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// What a `Set-Cookie` header asks the store to do.
#[derive(Debug, PartialEq, Eq)]
enum SetCookie {
    Store(CookieLine),
    Remove(CookieKey),
}

/// Interprets a `Set-Cookie` header received from `url`.
fn parse_set_cookie(header: &str, url: &Url, now: u64) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();

    let mut domain = None;
    let mut path = None;
    let mut secure = false;
    let mut expires = None;
    let mut max_age = None;

    for attribute in parts {
        let (key, attr_value) = attribute
            .split_once('=')
            .map_or((attribute.trim(), ""), |(k, v)| (k.trim(), v.trim()));
        match key.to_ascii_lowercase().as_str() {
            "domain" if !attr_value.is_empty() => {
                domain = Some(attr_value.trim_start_matches('.').to_ascii_lowercase());
            }
            "path" if attr_value.starts_with('/') => path = Some(attr_value.to_string()),
            "secure" => secure = true,
            "expires" => {
                expires = httpdate::parse_http_date(attr_value)
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs());
            }
            "max-age" => max_age = attr_value.parse::<i64>().ok(),
            _ => {}
        }
    }

    let path = path.unwrap_or_else(|| default_path(url));
    let (domain, tailmatch) = match domain {
        Some(domain) => (format!(".{domain}"), true),
        None => (host, false),
    };

    let expires = match (max_age, expires) {
        (Some(seconds), _) if seconds <= 0 => None,
        (Some(seconds), _) => Some(now.saturating_add(seconds.unsigned_abs())),
        (None, Some(at)) if at <= now => None,
        (None, Some(at)) => Some(at),
        (None, None) => Some(0),
    };

    let cookie = CookieLine::new(
        domain,
        tailmatch,
        path,
        secure,
        expires.unwrap_or(0),
        name.to_string(),
        value.trim().to_string(),
    );
    match expires {
        Some(_) => Some(SetCookie::Store(cookie)),
        None => Some(SetCookie::Remove(cookie.key())),
    }
}

/// RFC 6265 default-path: the request path up to (not including) its last '/'.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// Builds the `Set-Cookie` string used to seed the jar from a stored cookie.
fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, cookie.value),
        format!("Path={}", cookie.path),
    ];
    if cookie.tailmatch {
        parts.push(format!("Domain={}", cookie.domain.trim_start_matches('.')));
    }
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.expires > 0
        && let Some(at) = UNIX_EPOCH.checked_add(Duration::from_secs(cookie.expires))
    {
        parts.push(format!("Expires={}", httpdate::fmt_http_date(at)));
    }
    parts.join("; ")
}

fn build_origin_url(cookie: &CookieLine) -> Option<Url> {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.trim_start_matches('.');
    Url::parse(&format!("{scheme}://{domain}{}", cookie.path)).ok()
}

/// Cookie store that can be written back to a Netscape cookie file.
///
/// Matching and sending is delegated to [`reqwest::cookie::Jar`]; this type
/// only keeps a parallel record of what the jar accepted.
#[derive(Default)]
pub struct SessionJar {
    jar: Jar,
    records: Mutex<BTreeMap<CookieKey, CookieLine>>,
    dirty: AtomicBool,
}

impl fmt::Debug for SessionJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionJar")
            .field("cookies", &self.len())
            .field("dirty", &self.dirty.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds stored cookies to the jar. Expired cookies are ignored.
    pub fn insert_all(&self, cookies: &[CookieLine]) {
        let now = unix_now();
        let mut records = self.lock_records();
        for cookie in cookies {
            if cookie.is_expired_at(now) {
                debug!(domain = %cookie.domain, name = %cookie.name, "ignoring expired cookie");
                continue;
            }
            let Some(origin) = build_origin_url(cookie) else {
                warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unparseable domain");
                continue;
            };
            self.jar.add_cookie_str(&build_set_cookie_string(cookie), &origin);
            records.insert(cookie.key(), cookie.clone());
        }
    }

    /// Loads a cookie file. A missing file is not an error.
    ///
    /// Returns the number of cookies loaded.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError`] when the file cannot be read or parsed.
    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    pub async fn load_file(&self, path: &Path) -> Result<usize, CookieError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "cookie file not found");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_netscape_cookies(std::io::Cursor::new(raw))?;
        self.insert_all(&parsed.cookies);
        debug!(count = parsed.cookies.len(), "loaded session cookies");
        Ok(parsed.cookies.len())
    }

    /// Writes the non-expired cookies to `path` (owner-only on Unix).
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] when the file cannot be written.
    pub async fn save_file(&self, path: &Path) -> Result<(), CookieError> {
        let contents = write_netscape_cookies(&self.snapshot());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    /// Returns the currently recorded, non-expired cookies.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CookieLine> {
        let now = unix_now();
        self.lock_records()
            .values()
            .filter(|cookie| !cookie.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Number of recorded cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    /// Returns true when no cookie is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether cookies changed since the last call, and resets the flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, BTreeMap<CookieKey, CookieLine>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        let now = unix_now();
        {
            let mut records = self.lock_records();
            for header in &headers {
                let Ok(raw) = header.to_str() else {
                    continue;
                };
                match parse_set_cookie(raw, url, now) {
                    Some(SetCookie::Store(cookie)) => {
                        debug!(domain = %cookie.domain, name = %cookie.name, "cookie set");
                        records.insert(cookie.key(), cookie);
                    }
                    Some(SetCookie::Remove(key)) => {
                        records.remove(&key);
                    }
                    None => continue,
                }
                self.dirty.store(true, Ordering::SeqCst);
            }
        }
        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}
