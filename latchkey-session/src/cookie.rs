//! Cookie header handling.

use crate::config::CookieOptions;

/// Expiry date sent when deleting a cookie.
const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// What the response should do with the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieAction {
    /// Set the cookie to the given signed token
    Set(String),
    /// Expire the cookie on the client
    Delete,
    /// Leave the client's cookie untouched
    Keep,
}

impl CookieAction {
    /// Render the `Set-Cookie` header value for this action, if any.
    pub fn header_value(&self, options: &CookieOptions) -> Option<String> {
        match self {
            CookieAction::Set(token) => Some(options.set_cookie(token)),
            CookieAction::Delete => Some(options.delete_cookie()),
            CookieAction::Keep => None,
        }
    }
}

impl CookieOptions {
    /// `Set-Cookie` value carrying `token`.
    pub fn set_cookie(&self, token: &str) -> String {
        let mut cookie = format!("{}={}", self.name, token);

        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age));
        }

        self.push_scope(&mut cookie);

        if self.secure {
            cookie.push_str("; Secure");
        }

        if self.http_only {
            cookie.push_str("; HttpOnly");
        }

        if let Some(same_site) = self.same_site {
            cookie.push_str(&format!("; SameSite={}", same_site.as_str()));
        }

        cookie
    }

    /// `Set-Cookie` value that removes the cookie under the same name,
    /// path and domain.
    pub fn delete_cookie(&self) -> String {
        let mut cookie = format!("{}=; Max-Age=0", self.name);
        self.push_scope(&mut cookie);
        cookie.push_str(&format!("; Expires={}", EPOCH));
        cookie
    }

    fn push_scope(&self, cookie: &mut String) {
        cookie.push_str(&format!("; Path={}", self.path));
        if let Some(ref domain) = self.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }
    }
}

/// Extract the value of cookie `name` from a `Cookie` request header.
///
/// Surrounding double quotes are stripped. Returns `None` when the cookie is
/// missing or empty.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; session=abc.def; other=1";
        assert_eq!(cookie_value(header, "session"), Some("abc.def"));
        assert_eq!(cookie_value(header, "theme"), Some("dark"));
        assert_eq!(cookie_value(header, "missing"), None);
    }

    #[test]
    fn test_cookie_value_edge_cases() {
        assert_eq!(cookie_value("", "session"), None);
        assert_eq!(cookie_value("session=", "session"), None);
        assert_eq!(cookie_value("session=\"quoted\"", "session"), Some("quoted"));
        assert_eq!(cookie_value("mysession=x", "session"), None);
        assert_eq!(cookie_value("garbage;session=v", "session"), Some("v"));
    }

    #[test]
    fn test_set_cookie_defaults() {
        let options = CookieOptions::default();
        assert_eq!(
            options.set_cookie("tok"),
            "session=tok; Path=/; HttpOnly"
        );
    }

    #[test]
    fn test_set_cookie_all_attributes() {
        let options = CookieOptions {
            name: "sid".into(),
            max_age: Some(3600),
            path: "/app".into(),
            domain: Some("example.com".into()),
            secure: true,
            http_only: false,
            same_site: Some(SameSite::Strict),
        };
        assert_eq!(
            options.set_cookie("tok"),
            "sid=tok; Max-Age=3600; Path=/app; Domain=example.com; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn test_delete_cookie() {
        let options = CookieOptions {
            domain: Some("example.com".into()),
            ..Default::default()
        };
        assert_eq!(
            options.delete_cookie(),
            "session=; Max-Age=0; Path=/; Domain=example.com; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn test_action_header_value() {
        let options = CookieOptions::default();
        assert!(CookieAction::Keep.header_value(&options).is_none());
        assert!(
            CookieAction::Delete
                .header_value(&options)
                .unwrap()
                .contains("Max-Age=0")
        );
        assert!(
            CookieAction::Set("tok".into())
                .header_value(&options)
                .unwrap()
                .starts_with("session=tok")
        );
    }
}
