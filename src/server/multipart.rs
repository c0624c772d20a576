//! `multipart/form-data` body parsing

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MultipartError {
    #[error("Expected multipart/form-data")]
    NotMultipart,
    #[error("Missing multipart boundary")]
    MissingBoundary,
    #[error("Malformed multipart body: {0}")]
    Malformed(&'static str),
}

/// One form field
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).trim().to_string()
    }
}

/// Parsed form
#[derive(Debug, Clone, Default)]
pub struct Form {
    pub parts: Vec<Part>,
}

impl Form {
    pub fn get(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Text value of a non-file field
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(Part::text)
    }
}

/// Boundary from a `Content-Type` header value
pub fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';').map(str::trim);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    params
        .filter_map(|p| p.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Parse a complete body
pub fn parse(content_type: &str, body: &[u8]) -> Result<Form, MultipartError> {
    let boundary = boundary(content_type)?;
    let delimiter = format!("--{}", boundary).into_bytes();
    let separator = format!("\r\n--{}", boundary).into_bytes();

    let mut pos = find(body, &delimiter, 0).ok_or(MultipartError::Malformed("no opening boundary"))? + delimiter.len();
    let mut form = Form::default();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(form);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(MultipartError::Malformed("boundary not followed by CRLF"));
        }
        pos += 2;

        let headers_end = find(body, b"\r\n\r\n", pos).ok_or(MultipartError::Malformed("unterminated part headers"))?;
        let headers = String::from_utf8_lossy(&body[pos..headers_end]).into_owned();
        let data_start = headers_end + 4;
        let data_end = find(body, &separator, data_start).ok_or(MultipartError::Malformed("missing closing boundary"))?;

        form.parts.push(part_from(&headers, body[data_start..data_end].to_vec())?);
        pos = data_end + separator.len();
    }
}

fn part_from(headers: &str, data: Vec<u8>) -> Result<Part, MultipartError> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').map(str::trim) {
                if let Some((k, v)) = param.split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => name = Some(v),
                        "filename" => filename = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    Ok(Part {
        name: name.ok_or(MultipartError::Malformed("part without a name"))?,
        filename,
        content_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=----rapi42";

    fn encode(boundary: &str, parts: &[Part]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(filename) = &part.filename {
                disposition.push_str(&format!("; filename=\"{}\"", filename));
            }
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"\r\n");
            if let Some(ct) = &part.content_type {
                body.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(&part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary(CT).unwrap(), "----rapi42");
        assert_eq!(boundary("multipart/form-data; boundary=\"abc\"").unwrap(), "abc");
        assert_eq!(boundary("application/json"), Err(MultipartError::NotMultipart));
        assert_eq!(boundary("multipart/form-data"), Err(MultipartError::MissingBoundary));
    }

    #[test]
    fn test_parse_file_and_field() {
        let body = b"------rapi42\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"rx.png\"\r\n\
Content-Type: image/png\r\n\
\r\n\
\x89PNG\r\n--not-a-boundary\r\n\
------rapi42\r\n\
Content-Disposition: form-data; name=\"user_id\"\r\n\
\r\n\
17\r\n\
------rapi42--\r\n";

        let form = parse(CT, body).unwrap();
        assert_eq!(form.parts.len(), 2);

        let file = form.get("file").unwrap();
        assert_eq!(file.filename.as_deref(), Some("rx.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.data, b"\x89PNG\r\n--not-a-boundary");

        assert_eq!(form.text("user_id").as_deref(), Some("17"));
        assert!(form.get("missing").is_none());
    }

    #[test]
    fn test_encode_then_parse() {
        let parts = vec![Part {
            name: "file".into(),
            filename: Some("scan.jpg".into()),
            content_type: Some("image/jpeg".into()),
            data: vec![0xFF, 0xD8, 0x00, 0x0D, 0x0A],
        }];
        let form = parse(CT, &encode("----rapi42", &parts)).unwrap();
        assert_eq!(form.parts, parts);
    }

    #[test]
    fn test_truncated_body() {
        let body = b"------rapi42\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc";
        assert_eq!(parse(CT, body).unwrap_err(), MultipartError::Malformed("missing closing boundary"));
        assert!(parse(CT, b"garbage").is_err());
    }
}
