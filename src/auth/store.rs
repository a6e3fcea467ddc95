//! Domain/path-scoped cookie cache with Netscape-format disk persistence.
//!
//! The store is shared between the transport and the authentication engine.
//! All state sits behind one mutex; nothing awaits while holding it. Writes
//! to the jar file are serialized by a second mutex held across the rename.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::{debug, instrument, warn};
use url::Url;

use super::cookies::{Cookie, CookieError, parse_netscape_cookies, parse_set_cookie, write_netscape_cookies};

#[derive(Debug, Default)]
struct StoreState {
    cookies: Vec<Cookie>,
    loaded: bool,
}

/// Cookie cache keyed by `(domain, name)`; the latest write wins.
#[derive(Debug)]
pub struct CookieStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
    save_lock: Mutex<()>,
}

impl CookieStore {
    /// Creates a store persisted at `path`, or memory-only when `path` is `None`.
    ///
    /// Nothing is read until the first call that needs cookies.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            state: Mutex::new(StoreState::default()),
            save_lock: Mutex::new(()),
        }
    }

    /// Creates a memory-only store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// The jar file this store persists to.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded(&self) -> MutexGuard<'_, StoreState> {
        let mut state = self.lock();
        if !state.loaded {
            state.loaded = true;
            state.cookies = self.read_jar();
        }
        state
    }

    /// Reads persisted cookies once per store.
    ///
    /// A missing file starts empty. Read or parse failures are logged and the
    /// store proceeds empty; this never fails the caller.
    pub fn load(&self) {
        drop(self.loaded());
    }

    fn read_jar(&self) -> Vec<Cookie> {
        let Some(path) = self.path.as_deref() else {
            return Vec::new();
        };
        match read_jar_file(path) {
            Ok(cookies) => {
                let now = unix_now();
                let live: Vec<Cookie> = cookies.into_iter().filter(|c| !c.is_expired(now)).collect();
                debug!(path = %path.display(), cookies = live.len(), "loaded cookie jar");
                live
            }
            Err(CookieError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cookie jar yet; starting empty");
                Vec::new()
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read cookie jar; starting empty");
                Vec::new()
            }
        }
    }

    /// Returns `name=value` pairs of the cookies to send with a request to `url`.
    ///
    /// Cookies with longer paths come first; ties keep insertion order.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Vec<String> {
        let now = unix_now();
        let state = self.loaded();
        let mut matching: Vec<&Cookie> = state.cookies.iter().filter(|c| c.matches(url, now)).collect();
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matching.into_iter().map(Cookie::pair).collect()
    }

    /// Builds the `Cookie` header value for `url`, or `None` when nothing matches.
    #[must_use]
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs = self.cookies_for(url);
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Applies every `Set-Cookie` header in a response received from `url`.
    ///
    /// Malformed directives are skipped. A directive that is already expired
    /// removes the stored cookie of the same domain and name.
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub fn update(&self, url: &Url, headers: &HeaderMap) {
        let now = unix_now();
        let mut state = self.loaded();
        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                debug!("skipping non-UTF-8 Set-Cookie header");
                continue;
            };
            let Some(cookie) = parse_set_cookie(raw, url, now) else {
                debug!("skipping malformed Set-Cookie directive");
                continue;
            };
            upsert(&mut state.cookies, cookie, now);
        }
    }

    /// Inserts a single cookie, replacing any cookie with the same domain and name.
    pub fn insert(&self, cookie: Cookie) {
        let now = unix_now();
        upsert(&mut self.loaded().cookies, cookie, now);
    }

    /// Writes all stored cookies to the jar file.
    ///
    /// Writes to a sibling temp file and renames it into place, creating the
    /// directory on demand. Memory-only stores do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] when the directory, temp file, or rename fails.
    pub fn save(&self) -> Result<(), CookieError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        // Held until the rename so concurrent saves never share the temp file.
        let _saving = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.loaded().cookies.clone();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let file = fs::File::create(&tmp_path)?;
            write_netscape_cookies(BufWriter::new(file), &snapshot)?;
        }
        fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), cookies = snapshot.len(), "saved cookie jar");
        Ok(())
    }

    /// Saves and logs instead of failing; used after every request.
    pub fn persist(&self) {
        if let Err(error) = self.save() {
            warn!(error = %error, "failed to persist cookie jar");
        }
    }

    /// Removes cookies for `domain` (and its subdomains), or all cookies.
    pub fn clear(&self, domain: Option<&str>) {
        let mut state = self.loaded();
        match domain {
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                let suffix = format!(".{domain}");
                state
                    .cookies
                    .retain(|c| c.domain != domain && !c.domain.ends_with(&suffix));
            }
            None => state.cookies.clear(),
        }
    }

    /// Whether any unexpired cookie is stored.
    #[must_use]
    pub fn has_cookies(&self) -> bool {
        let now = unix_now();
        self.loaded().cookies.iter().any(|c| !c.is_expired(now))
    }

    /// Snapshot of all stored cookies.
    #[must_use]
    pub fn all(&self) -> Vec<Cookie> {
        self.loaded().cookies.clone()
    }
}

fn upsert(cookies: &mut Vec<Cookie>, cookie: Cookie, now: i64) {
    let existing = cookies
        .iter()
        .position(|c| c.domain == cookie.domain && c.name == cookie.name);
    match (existing, cookie.is_expired(now)) {
        (Some(idx), true) => {
            cookies.remove(idx);
        }
        (Some(idx), false) => cookies[idx] = cookie,
        (None, true) => {}
        (None, false) => cookies.push(cookie),
    }
}

fn read_jar_file(path: &Path) -> Result<Vec<Cookie>, CookieError> {
    let file = fs::File::open(path)?;
    let parsed = parse_netscape_cookies(BufReader::new(file))?;
    Ok(parsed.cookies)
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
