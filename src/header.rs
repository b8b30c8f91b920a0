use std::collections::HashMap;

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};

use crate::Error;

/// Headers of a single part, plus the parsed `Content-Disposition` params.
#[derive(Debug, Clone, Default)]
pub struct Header {
    raw: HeaderMap<HeaderValue>,
    disposition: HashMap<String, String>,
}

impl Header {
    pub(crate) fn new(raw: HeaderMap<HeaderValue>) -> Self {
        let disposition = raw
            .get(CONTENT_DISPOSITION)
            .and_then(|v| parse_disposition_params(&String::from_utf8_lossy(v.as_bytes())))
            .unwrap_or_default();

        Header { raw, disposition }
    }

    /// Parses the header lines of a part, with line endings already trimmed.
    pub(crate) fn from_lines<'a, I>(lines: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut raw = HeaderMap::new();

        for line in lines {
            let (name, value) = parse_header_line(line).ok_or_else(|| {
                Error::malformed(format!(
                    "malformed part header line: {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            raw.append(name, value);
        }

        Ok(Header::new(raw))
    }

    /// First value of the header, if present and valid text.
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.raw.get(key.as_ref()).and_then(|hv| hv.to_str().ok())
    }

    /// All values of the header in the order they appeared.
    pub fn get_all<K: AsRef<str>>(&self, key: K) -> impl Iterator<Item = &HeaderValue> {
        self.raw.get_all(key.as_ref()).iter()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    /// The `Content-Type` of the part parsed as a media type.
    pub fn mime(&self) -> Option<mime::Mime> {
        self.content_type().and_then(|ct| ct.parse().ok())
    }

    /// The form field name from `Content-Disposition`.
    pub fn name(&self) -> Option<&str> {
        self.disposition.get("name").map(String::as_str)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.disposition.get("filename").map(String::as_str)
    }

    /// Any `Content-Disposition` parameter, by lowercase name.
    pub fn disposition_param(&self, key: &str) -> Option<&str> {
        self.disposition.get(key).map(String::as_str)
    }

    pub fn raw(&self) -> &HeaderMap<HeaderValue> {
        &self.raw
    }

    /// Number of values per distinct header name.
    pub(crate) fn value_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.raw.keys().map(move |k| self.raw.get_all(k).iter().count())
    }
}

fn parse_header_line(line: &[u8]) -> Option<(HeaderName, HeaderValue)> {
    let colon = line.iter().position(|b| *b == b':')?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);

    let name = HeaderName::from_bytes(trim(name)).ok()?;
    let value = HeaderValue::from_bytes(trim(value)).ok()?;

    Some((name, value))
}

fn trim(mut bs: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bs {
        if !first.is_ascii_whitespace() {
            break;
        }
        bs = rest;
    }
    while let [rest @ .., last] = bs {
        if !last.is_ascii_whitespace() {
            break;
        }
        bs = rest;
    }
    bs
}

/// Parses `form-data; name="field"; filename="a.txt"` into its params.
/// Returns `None` when the value is not a well formed disposition.
///
/// Extended params (`filename*=UTF-8''%E2%82%AC.txt`) are decoded and take
/// precedence over the plain form of the same name.
fn parse_disposition_params(value: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut extended = HashMap::new();

    let (kind, mut rest) = match value.find(';') {
        Some(i) => (&value[..i], &value[i..]),
        None => (value, ""),
    };
    if kind.trim().is_empty() {
        return None;
    }

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(';')?.trim_start();
        if rest.is_empty() {
            break;
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        rest = rest[eq + 1..].trim_start();

        let (val, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
            parse_quoted(quoted)?
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            (rest[..end].trim_end().to_owned(), &rest[end..])
        };
        rest = remaining;

        if let Some(base) = key.strip_suffix('*') {
            if extended.contains_key(base) {
                return None;
            }
            // Undecodable extended values are dropped, the plain form remains.
            if let Some(decoded) = decode_extended_value(&val) {
                extended.insert(base.to_owned(), decoded);
            }
            continue;
        }

        if params.contains_key(&key) {
            return None;
        }
        params.insert(key, val);
    }

    params.extend(extended);
    Some(params)
}

/// Decodes an RFC 2231 value: `charset'language'percent-encoded`.
fn decode_extended_value(value: &str) -> Option<String> {
    let mut fields = value.splitn(3, '\'');
    let charset = fields.next()?;
    let _language = fields.next()?;
    let encoded = fields.next()?;

    if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
        return None;
    }

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_digit(*bytes.get(i + 1)?)?;
                let lo = hex_digit(*bytes.get(i + 2)?)?;
                out.push(hi << 4 | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).ok()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Reads a quoted string whose opening quote was already consumed.
fn parse_quoted(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = s.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &s[i + 1..])),
            '\\' => out.push(chars.next()?.1),
            c => out.push(c),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_lines() {
        let tests = [
            ("Content-Type: image/jpeg", "content-type", "image/jpeg"),
            ("Content-Length: 40669", "content-length", "40669"),
            ("X-Timestamp:1550567095.266", "x-timestamp", "1550567095.266"),
            ("X-Url: http://example.com:80/", "x-url", "http://example.com:80/"),
        ];

        for (line, exp_name, exp_val) in &tests {
            let (name, val) = parse_header_line(line.as_bytes()).expect("Parse header line");

            assert_eq!(exp_name, &name.as_str());
            assert_eq!(exp_val, &val.to_str().expect("header value to_str"));
        }

        assert!(parse_header_line(b"no colon here").is_none());
    }

    #[test]
    fn header_accessors() {
        let header = Header::from_lines(vec![
            &b"Content-Disposition: form-data; name=\"icon\"; filename=\"my icon.png\""[..],
            &b"Content-Type: image/png"[..],
        ])
        .unwrap();

        assert_eq!(header.name(), Some("icon"));
        assert_eq!(header.file_name(), Some("my icon.png"));
        assert_eq!(header.content_type(), Some("image/png"));
        assert_eq!(header.mime(), Some(mime::IMAGE_PNG));
        assert_eq!(header.get("content-type"), Some("image/png"));
        assert_eq!(header.value_counts().sum::<usize>(), 2);
    }

    #[test]
    fn repeated_headers_are_counted_per_value() {
        let header = Header::from_lines(vec![&b"X-A: 1"[..], &b"X-A: 2"[..], &b"X-B: 3"[..]]).unwrap();

        let mut counts: Vec<_> = header.value_counts().collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(header.get_all("x-a").count(), 2);
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = Header::from_lines(vec![&b"garbage"[..]]).unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }

    #[test]
    fn disposition_params() {
        let p = parse_disposition_params("form-data; name=field").unwrap();
        assert_eq!(p["name"], "field");

        let p = parse_disposition_params(r#"form-data; NAME="a\"b"; filename="x;y.txt""#).unwrap();
        assert_eq!(p["name"], "a\"b");
        assert_eq!(p["filename"], "x;y.txt");

        let p = parse_disposition_params("form-data").unwrap();
        assert!(p.is_empty());

        assert!(parse_disposition_params(r#"form-data; name="unterminated"#).is_none());
        assert!(parse_disposition_params("form-data; name=a; name=b").is_none());
        assert!(parse_disposition_params("").is_none());
    }

    #[test]
    fn extended_params_are_decoded() {
        let header = Header::from_lines(vec![&b"Content-Disposition: form-data; name=\"icon\"; \
filename=\"rates.txt\"; filename*=UTF-8''%E2%82%AC%20rates.txt"[..]])
        .unwrap();
        assert_eq!(header.file_name(), Some("\u{20ac} rates.txt"));
        assert_eq!(header.disposition_param("filename*"), None);

        let p = parse_disposition_params("form-data; name*=us-ascii'en'a%2Fb").unwrap();
        assert_eq!(p["name"], "a/b");

        // Unknown charsets and bad escapes leave the plain value alone.
        let p = parse_disposition_params("form-data; filename=a.txt; filename*=latin1''%E9").unwrap();
        assert_eq!(p["filename"], "a.txt");
        let p = parse_disposition_params("form-data; filename=a.txt; filename*=utf-8''%G1").unwrap();
        assert_eq!(p["filename"], "a.txt");
    }

    #[test]
    fn unparseable_disposition_gives_no_name() {
        let header =
            Header::from_lines(vec![&b"Content-Disposition: form-data; name=\"oops"[..]]).unwrap();
        assert_eq!(header.name(), None);
        assert!(header.get("content-disposition").is_some());
    }
}
