//! Page markup queries
//!
//! Parses pages with `scraper` (html5ever) and flattens the elements the UI
//! probes care about into owned values, so probes never hold a DOM across an
//! await point.

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    /// Serialized markup of the element's children
    pub inner: String,
    text: String,
}

impl Element {
    fn from_ref(element: ElementRef<'_>) -> Self {
        let value = element.value();
        Self {
            tag: value.name().to_string(),
            attrs: value
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            inner: element.inner_html(),
            text: element.text().collect::<Vec<_>>().join(" "),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Text content with whitespace collapsed
    pub fn text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Short human label: text, then value/name/id, then the tag itself
    pub fn label(&self) -> String {
        let text = self.text();
        if !text.is_empty() {
            return text;
        }
        ["value", "name", "id", "alt", "src", "href", "action"]
            .iter()
            .find_map(|k| self.attr(k).filter(|v| !v.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("<{}>", self.tag))
    }
}

/// Every element whose tag is in `tags`, in document order
pub fn find_elements(html: &str, tags: &[&str]) -> Vec<Element> {
    if tags.is_empty() {
        return Vec::new();
    }
    let Ok(selector) = Selector::parse(&tags.join(", ")) else {
        return Vec::new();
    };

    Html::parse_document(html)
        .select(&selector)
        .map(Element::from_ref)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <!-- <a href="https://commented.out">hidden</a> -->
          <A HREF="https://example.com/about" class=nav>About <b>us</b></A>
          <a href='/relative'>Relative</a>
          <img src="/logo.png" alt="Logo">
          <form action="/search" method="get">
            <input type="text" name="q">
            <input type="checkbox" name="exact" checked>
            <select name="lang"><option>en</option></select>
            <button type="submit">Go</button>
          </form>
          <button disabled>Delete</button>
          <img src="data:image/png;base64,AAAA" />
        </body></html>
    "#;

    fn hrefs(html: &str) -> Vec<String> {
        find_elements(html, &["a"])
            .iter()
            .filter_map(|a| a.attr("href").map(str::to_string))
            .collect()
    }

    #[test]
    fn test_finds_links_case_insensitively() {
        let links = find_elements(PAGE, &["a"]);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].attr("href"), Some("https://example.com/about"));
        assert_eq!(links[0].attr("class"), Some("nav"));
        assert_eq!(links[0].text(), "About us");
        assert_eq!(links[1].attr("href"), Some("/relative"));
    }

    #[test]
    fn test_void_and_self_closing_tags() {
        let images = find_elements(PAGE, &["img"]);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].label(), "Logo");
        assert!(images[1].attr("src").unwrap().starts_with("data:image"));
    }

    #[test]
    fn test_form_contents_are_scanned() {
        let forms = find_elements(PAGE, &["form"]);
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].attr("action"), Some("/search"));

        let fields = find_elements(&forms[0].inner, &["input", "select", "textarea"]);
        assert_eq!(fields.len(), 3);
        assert!(fields[1].has_attr("checked"));
        assert_eq!(fields[2].tag, "select");
        assert_eq!(find_elements(&fields[2].inner, &["option"]).len(), 1);

        let buttons = find_elements(PAGE, &["button"]);
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].label(), "Go");
        assert!(buttons[1].has_attr("disabled"));
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let elements = find_elements(r#"<input value="a>b" name=x>"#, &["input"]);
        assert_eq!(elements[0].attr("value"), Some("a>b"));
        assert_eq!(elements[0].attr("name"), Some("x"));
    }

    #[test]
    fn test_bare_less_than_in_text() {
        let html = r#"<p>if a < b it's fine</p><a href="https://example.com/x">x</a>"#;
        assert_eq!(hrefs(html), vec!["https://example.com/x"]);
    }

    #[test]
    fn test_raw_text_bodies_are_not_markup() {
        let html = r#"
            <script>var t = '<a href="https://phantom.invalid/">';</script>
            <style>a::after { content: "<a href='x'>"; }</style>
            <textarea><a href="https://typed.invalid/">typed</a></textarea>
            <a href="https://example.com/real">r</a>
        "#;
        assert_eq!(hrefs(html), vec!["https://example.com/real"]);
    }

    #[test]
    fn test_unterminated_markup() {
        assert!(find_elements("<a href=\"x", &["a"]).is_empty());
        assert!(find_elements("no tags here", &["a"]).is_empty());
        assert!(find_elements("<a href=x>x</a>", &[]).is_empty());
    }
}
