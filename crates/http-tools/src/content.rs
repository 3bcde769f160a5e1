//! Media type preference and negotiation.

use mime::Mime;

/// JSON-preference score: contains `json` > contains `yaml` > `text/*` > anything else.
#[must_use]
pub fn media_type_score(content_type: &str) -> u8 {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("json") {
        3
    } else if ct.contains("yaml") {
        2
    } else if ct.starts_with("text/") {
        1
    } else {
        0
    }
}

/// Highest-scoring media type; ties go to the first declared one.
#[must_use]
pub fn preferred_content_type<'a, I>(declared: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, u8)> = None;
    for ct in declared {
        let score = media_type_score(ct);
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((ct, score)),
        }
    }
    best.map(|(ct, _)| ct)
}

/// Build an `Accept` header value from the success-response media types.
///
/// Duplicates are removed and the result is ordered by preference (stable for equal scores).
#[must_use]
pub fn accept_header<'a, I>(declared: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    for ct in declared {
        if !seen.iter().any(|s| s.eq_ignore_ascii_case(ct)) {
            seen.push(ct);
        }
    }
    if seen.is_empty() {
        return None;
    }
    seen.sort_by_key(|ct| std::cmp::Reverse(media_type_score(ct)));
    Some(seen.join(", "))
}

#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    media_type_score(content_type) == 3
}

#[must_use]
pub fn is_form_urlencoded(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .is_ok_and(|m| m.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
}

#[must_use]
pub fn is_image_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.type_() == mime::IMAGE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_json_then_yaml_then_text() {
        assert_eq!(
            preferred_content_type(["text/plain", "application/x-yaml", "application/json"]),
            Some("application/json")
        );
        assert_eq!(
            preferred_content_type(["application/octet-stream", "text/csv"]),
            Some("text/csv")
        );
        assert_eq!(
            preferred_content_type(["application/xml", "application/octet-stream"]),
            Some("application/xml")
        );
        assert_eq!(preferred_content_type(std::iter::empty::<&str>()), None);
    }

    #[test]
    fn ties_keep_declaration_order() {
        assert_eq!(
            preferred_content_type(["application/problem+json", "application/json"]),
            Some("application/problem+json")
        );
    }

    #[test]
    fn accept_header_is_sorted_and_deduplicated() {
        assert_eq!(
            accept_header(["text/plain", "application/json", "text/plain"]).as_deref(),
            Some("application/json, text/plain")
        );
        assert_eq!(accept_header(std::iter::empty::<&str>()), None);
    }

    #[test]
    fn content_type_predicates() {
        assert!(is_form_urlencoded("application/x-www-form-urlencoded; charset=utf-8"));
        assert!(!is_form_urlencoded("application/json"));
        assert!(is_image_content_type(Some("image/png")));
        assert!(!is_image_content_type(Some("application/json")));
        assert!(!is_image_content_type(None));
    }
}
