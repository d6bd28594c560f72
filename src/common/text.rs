//! String helpers shared by the scraping resolvers.

use std::sync::LazyLock;

use rand::{Rng, seq::SliceRandom};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

const UA_PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Windows NT 10.0; WOW64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
    "X11; Ubuntu; Linux x86_64",
];

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[-a-zA-Z0-9+&@#/%?=~_|!:,.;]*[-a-zA-Z0-9+&@#/%=~_|]$").unwrap()
});

// String literals are matched first so their contents are skipped.
static JS_UNDEFINED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<str>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')|(?P<pre>[:\[,]\s*)undefined\b"#).unwrap()
});

static META_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<meta\s[^>]*>").unwrap());

static HTML_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?P<key>[a-zA-Z:_-]+)\s*=\s*"(?P<value>[^"]*)""#).unwrap());

static ISO_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").unwrap()
});

/// Form-style encoding (spaces become `+`).
pub fn url_encode(input: &str) -> String {
    urlencoding::encode(input).replace("%20", "+")
}

pub fn url_decode(input: &str) -> String {
    let plus_decoded = input.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

/// Repeating-key XOR over raw bytes.
pub fn xor_bytes(input: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return input.to_vec();
    }
    input
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

/// Repeating-key XOR over characters. Applying it twice with the same key
/// returns the original text.
pub fn decrypt_xor(input: &str, key: &str) -> String {
    let key: Vec<u32> = key.chars().map(u32::from).collect();
    if key.is_empty() {
        return input.to_string();
    }
    input
        .chars()
        .zip(key.iter().cycle())
        .map(|(c, k)| char::from_u32(u32::from(c) ^ k).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

pub fn is_url(input: &str) -> bool {
    URL_RE.is_match(input)
}

/// Returns the text between the first `start` marker and the next `end` after it.
pub fn extract_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

/// Rewrites bare `undefined` values so inline page scripts parse as JSON.
pub fn normalize_js_literals(js: &str) -> String {
    JS_UNDEFINED_RE
        .replace_all(js, |caps: &regex::Captures| match caps.name("pre") {
            Some(pre) => format!("{}null", pre.as_str()),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// A plausible desktop Chrome user agent with a randomized build number.
pub fn fake_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let platform = UA_PLATFORMS.choose(&mut rng).copied().unwrap_or(UA_PLATFORMS[0]);
    format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.{}.{} Safari/537.36",
        platform,
        rng.gen_range(85..=87),
        rng.gen_range(4100..4290),
        rng.gen_range(140..190),
    )
}

/// Header set mimicking a desktop Chrome navigation.
pub fn fake_chrome_headers(headers: &mut HeaderMap, user_agent: &str) {
    const FIXED: &[(&str, &str)] = &[
        ("connection", "keep-alive"),
        ("dnt", "1"),
        ("upgrade-insecure-requests", "1"),
        ("accept", "*/*"),
        ("accept-encoding", "none"),
        ("accept-language", "en-US,en;q=0.9"),
        (
            "sec-ch-ua",
            "\"Google Chrome\";v=\"113\", \"Chromium\";v=\"113\", \"Not=A?Brand\";v=\"24\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "no-cors"),
        ("sec-fetch-site", "cross-site"),
    ];

    for (name, value) in FIXED {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(reqwest::header::USER_AGENT, value);
    }
}

/// Parses an ISO-8601 duration such as `PT4M13S` into milliseconds.
pub fn parse_iso8601_duration(input: &str) -> Option<u64> {
    let caps = ISO_DURATION_RE.captures(input)?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let seconds: f64 = caps
        .get(4)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);

    let whole = part(1) * 86_400 + part(2) * 3_600 + part(3) * 60;
    Some(whole * 1000 + (seconds * 1000.0).round() as u64)
}

/// Content of a `<meta property=".." content="..">` tag, with basic
/// entities unescaped. Attribute order does not matter.
pub fn meta_property(html: &str, property: &str) -> Option<String> {
    META_TAG_RE.find_iter(html).find_map(|tag| {
        let mut key = None;
        let mut content = None;
        for attr in HTML_ATTR_RE.captures_iter(tag.as_str()) {
            match &attr["key"] {
                "property" | "name" => key = attr.name("value"),
                "content" => content = attr.name("value"),
                _ => {}
            }
        }
        if key?.as_str() != property {
            return None;
        }
        Some(unescape_html(content?.as_str()))
    })
}

pub fn unescape_html(input: &str) -> String {
    input
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_property() {
        let html = r#"<head><meta property="og:title" content="Tom &amp; Jerry"><meta content="https://y.yarn.co/a.png" name="og:image"/></head>"#;
        assert_eq!(meta_property(html, "og:title").as_deref(), Some("Tom & Jerry"));
        assert_eq!(meta_property(html, "og:image").as_deref(), Some("https://y.yarn.co/a.png"));
        assert_eq!(meta_property(html, "og:video"), None);
    }

    #[test]
    fn test_meta_property_skips_other_tags() {
        let html = r#"<meta charset="utf-8"><meta name="og:title"><meta name="og:title" content="Second"><meta property="og:titles" content="x">"#;
        assert_eq!(meta_property(html, "og:title").as_deref(), Some("Second"));
        assert_eq!(meta_property(html, "og:title2"), None);
    }

    #[test]
    fn test_xor_is_an_involution() {
        let plain = "https://example.com/media.mp4";
        let scrambled = decrypt_xor(plain, "TESTKEY");
        assert_ne!(scrambled, plain);
        assert_eq!(decrypt_xor(&scrambled, "TESTKEY"), plain);

        let bytes = xor_bytes(plain.as_bytes(), b"TESTKEY");
        assert_eq!(xor_bytes(&bytes, b"TESTKEY"), plain.as_bytes());
    }

    #[test]
    fn test_xor_with_empty_key_is_identity() {
        assert_eq!(decrypt_xor("abc", ""), "abc");
        assert_eq!(xor_bytes(b"abc", b""), b"abc".to_vec());
    }

    #[test]
    fn test_url_encoding_round_trip() {
        assert_eq!(url_encode("hello world & more"), "hello+world+%26+more");
        assert_eq!(url_decode("hello+world+%26+more"), "hello world & more");
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://www.mixcloud.com/user/mix/"));
        assert!(is_url("http://example.com/a?b=c"));
        assert!(!is_url("speak:hello"));
        assert!(!is_url("ftp://example.com/file"));
    }

    #[test]
    fn test_extract_between() {
        let text = "a window.ytplayer = {};ytcfg.set({\"A\":1});ytcfg.set({})";
        assert_eq!(
            extract_between(text, "window.ytplayer = {};ytcfg.set(", ");ytcfg.set("),
            Some("{\"A\":1}")
        );
        assert_eq!(extract_between(text, "missing", ")"), None);
    }

    #[test]
    fn test_normalize_js_literals() {
        let js = r#"{"a":undefined,"b":[undefined, 1],"c":"undefined value"}"#;
        let normalized = normalize_js_literals(js);
        assert_eq!(normalized, r#"{"a":null,"b":[null, 1],"c":"undefined value"}"#);
        assert!(serde_json::from_str::<serde_json::Value>(&normalized).is_ok());
    }

    #[test]
    fn test_normalize_js_literals_leaves_strings_alone() {
        let js = r#"{"a":"x, undefined y","b":"say \"hi\", undefined","c":undefined,"d":'[undefined'}"#;
        assert_eq!(
            normalize_js_literals(js),
            r#"{"a":"x, undefined y","b":"say \"hi\", undefined","c":null,"d":'[undefined'}"#
        );
    }

    #[test]
    fn test_fake_user_agent_shape() {
        let ua = fake_user_agent();
        assert!(ua.starts_with("Mozilla/5.0 ("));
        assert!(ua.contains("Chrome/8"));
    }

    #[test]
    fn test_fake_chrome_headers() {
        let mut headers = HeaderMap::new();
        fake_chrome_headers(&mut headers, CHROME_USER_AGENT);
        assert_eq!(headers["dnt"], "1");
        assert_eq!(headers["sec-fetch-mode"], "no-cors");
        assert_eq!(headers[reqwest::header::USER_AGENT], CHROME_USER_AGENT);
    }

    #[test]
    fn test_parse_iso8601_duration() {
        assert_eq!(parse_iso8601_duration("PT4M13S"), Some(253_000));
        assert_eq!(parse_iso8601_duration("PT1H"), Some(3_600_000));
        assert_eq!(parse_iso8601_duration("P1DT1S"), Some(86_401_000));
        assert_eq!(parse_iso8601_duration("P0D"), Some(0));
        assert_eq!(parse_iso8601_duration("4:13"), None);
    }
}
