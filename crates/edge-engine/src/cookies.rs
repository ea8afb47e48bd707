//! Cookie mutations aggregated into `Set-Cookie` headers.

use std::fmt;

/// `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("Strict"),
            Self::Lax => f.write_str("Lax"),
            Self::None => f.write_str("None"),
        }
    }
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    /// A cookie scoped to `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    /// An expired, empty cookie that deletes `name`.
    pub fn deletion(name: impl Into<String>) -> Self {
        Self::new(name, "").with_max_age(0)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Value of the `Set-Cookie` header.
    pub fn header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Path={}",
            self.name,
            urlencoding::encode(&self.value),
            self.path
        );
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        out
    }
}

/// Cookie mutations made while handling one request.
///
/// A later change to the same name and path replaces the earlier one; the
/// first-change order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    changes: Vec<SetCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, cookie: SetCookie) {
        match self
            .changes
            .iter_mut()
            .find(|c| c.name == cookie.name && c.path == cookie.path)
        {
            Some(existing) => *existing = cookie,
            None => self.changes.push(cookie),
        }
    }

    pub fn delete(&mut self, name: &str) {
        self.set(SetCookie::deletion(name));
    }

    /// The pending change for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&SetCookie> {
        self.changes.iter().rev().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// One `Set-Cookie` value per change.
    pub fn header_values(&self) -> Vec<String> {
        self.changes.iter().map(SetCookie::header_value).collect()
    }
}
