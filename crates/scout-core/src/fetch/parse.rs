//! Parse response headers and HTML titles.

/// Headers the pipeline cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub content_type: Option<String>,
}

/// Parse collected header lines (status line included) into HeaderInfo.
pub fn parse_headers(lines: &[String]) -> HeaderInfo {
    let mut info = HeaderInfo::default();
    for line in lines {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-type") {
            info.content_type = Some(value.to_string());
        }
    }
    info
}

/// Text of the first `<title>` element, whitespace collapsed and the common
/// entities decoded. `None` when missing or blank.
pub fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let raw = &html[start..end];
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let decoded = decode_entities(&collapsed);
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
