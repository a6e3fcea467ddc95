//! Session credentials: the cookie store and the crumb engine.
//!
//! Cookies persist in Netscape format so a jar exported from a browser can
//! seed the store.

mod cookies;
mod crumb;
mod store;

pub use cookies::{
    Cookie, CookieError, NETSCAPE_HEADER, ParseResult, format_cookie_line, parse_netscape_cookies,
    parse_set_cookie, write_netscape_cookies,
};
pub use crumb::{AuthEngine, AuthError, Strategy};
pub use store::CookieStore;
