//! Multipart upload wire documents
//!
//! Only the shapes the protocol relies on are handled: the initiate
//! response (located by its `UploadId` element), the completion request
//! (`CompleteMultipartUpload` wrapping ordered `Part` elements), and the
//! `Error` document some stores return with a 200 on completion.

/// Element carrying the session identity in the initiate response
pub const UPLOAD_ID_ELEMENT: &str = "UploadId";

/// Text content of the first `<name>...</name>` element, unescaped.
///
/// Returns `None` if the element is missing or unterminated.
pub fn find_element(body: &str, name: &str) -> Option<String> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(unescape(body[start..end].trim()))
}

/// Every `<name>...</name>` element body, in document order
fn find_all<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let mut out = Vec::new();
    for chunk in body.split(open.as_str()).skip(1) {
        if let Some(end) = chunk.find(close.as_str()) {
            out.push(&chunk[..end]);
        }
    }
    out
}

/// True if the body is an S3 `<Error>` document
pub fn is_error_document(body: &str) -> bool {
    find_element(body, "Code").is_some() && body.contains("<Error>")
}

/// Render the completion request for parts already in final order
pub fn render_complete_request<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = (u64, &'a str)>,
{
    let mut xml = String::from("<CompleteMultipartUpload>\n");
    for (part_number, etag) in parts {
        xml.push_str("  <Part>\n");
        xml.push_str(&format!("    <PartNumber>{}</PartNumber>\n", part_number));
        xml.push_str(&format!("    <ETag>{}</ETag>\n", escape(etag)));
        xml.push_str("  </Part>\n");
    }
    xml.push_str("</CompleteMultipartUpload>\n");
    xml
}

/// Parse a completion request back into (part number, tag) pairs
pub fn parse_complete_request(body: &str) -> Result<Vec<(u64, String)>, String> {
    if !body.contains("<CompleteMultipartUpload>") {
        return Err("missing CompleteMultipartUpload element".into());
    }
    find_all(body, "Part")
        .into_iter()
        .map(|part| {
            let number = find_element(part, "PartNumber")
                .ok_or_else(|| "Part without PartNumber".to_string())?;
            let number = number
                .parse::<u64>()
                .map_err(|e| format!("bad PartNumber {:?}: {}", number, e))?;
            let etag = find_element(part, "ETag").ok_or_else(|| "Part without ETag".to_string())?;
            Ok((number, etag.trim_matches('"').to_string()))
        })
        .collect()
}

/// Render an initiate response as the store would
pub fn render_initiate_response(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <InitiateMultipartUploadResult>\
         <Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>\
         </InitiateMultipartUploadResult>",
        escape(bucket),
        escape(key),
        escape(upload_id)
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_upload_id() {
        let body = render_initiate_response("weave", "obj", "abc&def");
        assert_eq!(find_element(&body, UPLOAD_ID_ELEMENT).as_deref(), Some("abc&def"));
        assert_eq!(find_element("<Other>x</Other>", UPLOAD_ID_ELEMENT), None);
        assert_eq!(find_element("<UploadId>unterminated", UPLOAD_ID_ELEMENT), None);
    }

    #[test]
    fn test_complete_request_shape() {
        let tags = ["a".repeat(32), "b".repeat(32)];
        let xml = render_complete_request(vec![(0, tags[0].as_str()), (1, tags[1].as_str())]);
        assert!(xml.starts_with("<CompleteMultipartUpload>"));
        assert!(xml.contains("<PartNumber>1</PartNumber>"));

        let parsed = parse_complete_request(&xml).unwrap();
        assert_eq!(parsed, vec![(0, tags[0].clone()), (1, tags[1].clone())]);
    }

    #[test]
    fn test_error_document() {
        let body = "<Error><Code>InvalidPart</Code><Message>nope</Message></Error>";
        assert!(is_error_document(body));
        assert!(!is_error_document("<CompleteMultipartUploadResult/>"));
    }
}
