//! Document shell wrapping streamed markup.
//!
//! The shell is written before the first payload row and closed after the
//! last one. Every inline script the markup phase emits goes through
//! [`Shell::script`] so a CSP nonce, when configured, covers all of them.

/// Escape text for use in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape text placed inside an inline `<script>` element.
pub fn escape_script(text: &str) -> String {
    text.replace("</", "<\\/").replace("<!--", "<\\!--")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HeadTag {
    Meta { name: String, content: String },
    Stylesheet(String),
    ExternalScript(String),
}

/// `<head>` content, in insertion order after charset and title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadContent {
    pub title: Option<String>,
    tags: Vec<HeadTag>,
}

impl HeadContent {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            tags: Vec::new(),
        }
    }

    pub fn with_meta(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.tags.push(HeadTag::Meta {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_stylesheet(mut self, href: impl Into<String>) -> Self {
        self.tags.push(HeadTag::Stylesheet(href.into()));
        self
    }

    /// A deferred external script, e.g. the client bundle.
    pub fn with_script_src(mut self, src: impl Into<String>) -> Self {
        self.tags.push(HeadTag::ExternalScript(src.into()));
        self
    }

    fn write(&self, nonce: Option<&str>, html: &mut String) {
        html.push_str("<meta charset=\"utf-8\">\n");
        if let Some(title) = &self.title {
            html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
        }
        for tag in &self.tags {
            match tag {
                HeadTag::Meta { name, content } => html.push_str(&format!(
                    "<meta name=\"{}\" content=\"{}\">\n",
                    escape_html(name),
                    escape_html(content)
                )),
                HeadTag::Stylesheet(href) => {
                    html.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", escape_html(href)))
                }
                HeadTag::ExternalScript(src) => html.push_str(&format!(
                    "<script{} src=\"{}\" defer></script>\n",
                    nonce_attr(nonce),
                    escape_html(src)
                )),
            }
        }
    }
}

fn nonce_attr(nonce: Option<&str>) -> String {
    nonce
        .map(|n| format!(" nonce=\"{}\"", escape_html(n)))
        .unwrap_or_default()
}

/// Document around the streamed body markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    pub lang: String,
    pub head: HeadContent,
    /// Nonce stamped on every inline and external script.
    pub nonce: Option<String>,
}

impl Shell {
    pub fn new(head: HeadContent) -> Self {
        Self {
            lang: "en".to_string(),
            head,
            nonce: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// An inline script element; `source` is escaped for script context.
    pub fn script(&self, source: &str) -> String {
        format!(
            "<script{}>{}</script>",
            nonce_attr(self.nonce.as_deref()),
            escape_script(source)
        )
    }

    /// Doctype through the opening `<body>`, with `runtime` as the first
    /// inline script of the body.
    pub fn opening(&self, runtime: &str) -> String {
        let mut html = format!("<!DOCTYPE html>\n<html lang=\"{}\">\n<head>\n", escape_html(&self.lang));
        self.head.write(self.nonce.as_deref(), &mut html);
        html.push_str("</head>\n<body>\n");
        if !runtime.is_empty() {
            html.push_str(&self.script(runtime));
            html.push('\n');
        }
        html
    }

    pub fn closing(&self) -> &'static str {
        "</body>\n</html>"
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(HeadContent::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Escaping Tests ===

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_escape_script_breaks_closing_tag() {
        assert_eq!(escape_script("a</script>b"), "a<\\/script>b");
        assert_eq!(escape_script("<!--x"), "<\\!--x");
    }

    // === Document Tests ===

    #[test]
    fn test_opening_renders_head_then_runtime() {
        let shell = Shell::new(
            HeadContent::new("Docs <1>")
                .with_meta("viewport", "width=device-width")
                .with_stylesheet("/_edge/static/app.css"),
        );
        let opening = shell.opening("self.x=1");

        assert!(opening.starts_with("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">"));
        assert!(opening.contains("<title>Docs &lt;1&gt;</title>"));
        assert!(opening.contains("<meta name=\"viewport\" content=\"width=device-width\">"));
        assert!(opening.contains("<link rel=\"stylesheet\" href=\"/_edge/static/app.css\">"));
        assert!(opening.ends_with("<body>\n<script>self.x=1</script>\n"));
        assert_eq!(shell.closing(), "</body>\n</html>");
    }

    #[test]
    fn test_nonce_stamped_on_every_script() {
        let shell = Shell::new(HeadContent::default().with_script_src("/_edge/static/client.js")).with_nonce("abc");
        let opening = shell.opening("boot()");

        assert!(opening.contains("<script nonce=\"abc\" src=\"/_edge/static/client.js\" defer></script>"));
        assert!(opening.contains("<script nonce=\"abc\">boot()</script>"));
        assert_eq!(shell.script("a</b"), "<script nonce=\"abc\">a<\\/b</script>");
    }

    #[test]
    fn test_lang_attribute_is_escaped() {
        let opening = Shell::default().with_lang("en\"x").opening("");
        assert!(opening.contains("<html lang=\"en&quot;x\">"));
    }

    #[test]
    fn test_empty_runtime_is_omitted() {
        let opening = Shell::default().opening("");
        assert!(opening.ends_with("<body>\n"));
        assert!(!opening.contains("<script"));
    }
}
