//! Content-Security-Policy helpers.
//!
//! Used by the server's `resources/read` path to inject a CSP `<meta>` tag
//! into HTML resource content when a policy is configured.

/// Whether a MIME type denotes HTML content.
pub fn is_html_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    essence.eq_ignore_ascii_case("text/html") || essence.eq_ignore_ascii_case("application/xhtml+xml")
}

/// Build a CSP `<meta>` tag for the given policy. Double quotes in the
/// policy are stripped; CSP directives never require them.
pub fn csp_meta_tag(policy: &str) -> String {
    let sanitized = policy.replace('"', "");
    format!(r#"<meta http-equiv="Content-Security-Policy" content="{sanitized}">"#)
}

/// Inject a CSP `<meta>` tag into an HTML document.
///
/// The tag is placed immediately after the opening `<head>` tag when one
/// exists (case-insensitive, attributes allowed), otherwise prepended to
/// the document so the policy still applies.
pub fn inject_csp(html: &str, policy: &str) -> String {
    let tag = csp_meta_tag(policy);
    let lower = html.to_ascii_lowercase();

    if let Some(start) = lower.find("<head") {
        if let Some(end) = lower[start..].find('>') {
            let insert_at = start + end + 1;
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..insert_at]);
            out.push_str(&tag);
            out.push_str(&html[insert_at..]);
            return out;
        }
    }
    format!("{tag}{html}")
}
