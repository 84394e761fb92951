//! Response construction: redirects, the branded error page, and the
//! configured extra headers applied to every outgoing response.

use axum::response::{Html, IntoResponse, Response};
use http::header::{HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Branded error/info page; `${token}` placeholders substituted at render
/// time. Unknown placeholders render as empty string, never an error.
const ERROR_PAGE_TEMPLATE: &str = include_str!("../assets/error-page.html");

/// 307 redirect with optional Set-Cookie headers.
pub fn redirect_to(location: &str, cookies: &[String]) -> Response {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
        }
        Err(err) => {
            tracing::error!(%err, location, "redirect location is not a valid header value");
            return StaticPage {
                title: "Technical problem",
                message: "We ran into a technical problem.",
                details: "Contact administrator",
                link_href: "/",
                link_text: "Home",
                status: StatusCode::INTERNAL_SERVER_ERROR,
            }
            .into_response();
        }
    }

    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => {
                tracing::error!(%err, "dropping cookie with invalid header value");
            }
        }
    }

    (StatusCode::TEMPORARY_REDIRECT, headers).into_response()
}

/// The branded static page shown for errors and authorization denials.
pub struct StaticPage<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub details: &'a str,
    pub link_href: &'a str,
    pub link_text: &'a str,
    pub status: StatusCode,
}

impl StaticPage<'_> {
    pub fn into_response(self) -> Response {
        let params = HashMap::from([
            ("title", self.title),
            ("message", self.message),
            ("details", self.details),
            ("linkHref", self.link_href),
            ("linkText", self.link_text),
            ("region", deployment_region()),
        ]);
        let body = render_template(ERROR_PAGE_TEMPLATE, &params);
        (self.status, Html(body)).into_response()
    }
}

/// Region shown in the page footer, read from the environment once per
/// process.
fn deployment_region() -> &'static str {
    static REGION: OnceLock<String> = OnceLock::new();
    REGION.get_or_init(|| std::env::var("AWS_REGION").unwrap_or_default())
}

/// Substitute `${token}` placeholders. Values are HTML-escaped on insertion:
/// the details of a client error echo querystring content, which must never
/// land in the page as live markup. Unknown tokens become empty strings; an
/// unterminated placeholder is emitted verbatim.
pub fn render_template(template: &str, params: &HashMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                if let Some(value) = params.get(key) {
                    out.push_str(&html_escape(value));
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escape a value for HTML element content or a quoted attribute.
fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Apply the configured extra headers. Invalid names or values are skipped
/// with a warning rather than failing the response.
pub fn apply_headers(headers: &mut HeaderMap, extra: &HashMap<String, String>) {
    for (name, value) in extra {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(%err, header = %name, "skipping invalid configured header name");
                continue;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, header = %name, "skipping invalid configured header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let params = HashMap::from([("title", "Hello"), ("message", "World")]);
        assert_eq!(
            render_template("<h1>${title}</h1><p>${message}</p>", &params),
            "<h1>Hello</h1><p>World</p>"
        );
    }

    #[test]
    fn substituted_values_are_html_escaped() {
        let params = HashMap::from([("details", "<script>alert(1)</script>")]);
        let body = render_template("<p>${details}</p>", &params);
        assert!(!body.contains("<script>"));
        assert_eq!(body, "<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>");
    }

    #[test]
    fn attribute_breaking_quotes_are_escaped() {
        let params = HashMap::from([("linkHref", r#""><script>x</script>"#)]);
        let body = render_template(r#"<a href="${linkHref}">go</a>"#, &params);
        assert!(!body.contains(r#""><script>"#));
        assert!(body.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let params = HashMap::new();
        assert_eq!(render_template("a${nope}b", &params), "ab");
    }

    #[test]
    fn unterminated_placeholder_is_left_verbatim() {
        let params = HashMap::from([("x", "y")]);
        assert_eq!(render_template("a${x} ${oops", &params), "ay ${oops");
    }

    #[test]
    fn redirect_sets_location_and_cookies() {
        let response = redirect_to(
            "https://example.com/next",
            &["a=1; Path=/".to_string(), "b=2; Path=/".to_string()],
        );
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://example.com/next"
        );
        let cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn invalid_location_degrades_to_error_page() {
        let response = redirect_to("https://example.com/\nevil", &[]);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_configured_headers_are_skipped() {
        let mut headers = HeaderMap::new();
        let extra = HashMap::from([
            ("X-Ok".to_string(), "yes".to_string()),
            ("Bad Name".to_string(), "nope".to_string()),
        ]);
        apply_headers(&mut headers, &extra);
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
        assert_eq!(headers.len(), 1);
    }
}
