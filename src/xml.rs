//! S3 XML documents.
//!
//! Readers for the response documents the verifier inspects and a writer
//! for the one request body it sends (`CompleteMultipartUpload`), using
//! `quick-xml`.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Text of every element named `element`, in document order.
pub fn element_values(body: &[u8], element: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut values = Vec::new();
    let mut depth_in_target = 0usize;
    let mut current = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if e.name().as_ref() == element.as_bytes() {
                    depth_in_target += 1;
                    current.clear();
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == element.as_bytes() {
                    values.push(String::new());
                }
            }
            Ok(Event::Text(ref e)) => {
                if depth_in_target > 0 {
                    let text = e.unescape().map_err(|e| e.to_string())?;
                    current.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == element.as_bytes() && depth_in_target > 0 {
                    depth_in_target -= 1;
                    values.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "error at position {}: {e}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(values)
}

/// First text of `element`, if any.
pub fn first_value(body: &[u8], element: &str) -> Result<Option<String>, String> {
    Ok(element_values(body, element)?.into_iter().next())
}

/// Render the `<CompleteMultipartUpload>` request body.
///
/// ```xml
/// <CompleteMultipartUpload>
///   <Part><PartNumber>1</PartNumber><ETag>"etag"</ETag></Part>
/// </CompleteMultipartUpload>
/// ```
pub fn render_complete_multipart_upload(parts: &[(u32, &str)]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Start(BytesStart::new("CompleteMultipartUpload")))
        .expect("start root");
    for (number, etag) in parts {
        let number = number.to_string();
        write_simple_element_group(
            &mut writer,
            "Part",
            &[("PartNumber", number.as_str()), ("ETag", etag)],
        );
    }
    writer
        .write_event(Event::End(BytesEnd::new("CompleteMultipartUpload")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write `<group><k1>v1</k1>...</group>`.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    group: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(group)))
        .expect("start group");
    for (name, value) in children {
        writer
            .write_event(Event::Start(BytesStart::new(*name)))
            .expect("start child");
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .expect("child text");
        writer
            .write_event(Event::End(BytesEnd::new(*name)))
            .expect("end child");
    }
    writer
        .write_event(Event::End(BytesEnd::new(group)))
        .expect("end group");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_from_initiate_result() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>b</Bucket><Key>k</Key><UploadId>abc-123</UploadId>
</InitiateMultipartUploadResult>"#;
        assert_eq!(
            first_value(body, "UploadId").unwrap().as_deref(),
            Some("abc-123")
        );
    }

    #[test]
    fn test_element_values_in_order() {
        let body = b"<R><Part><PartNumber>1</PartNumber></Part><Part><PartNumber>2</PartNumber></Part></R>";
        assert_eq!(element_values(body, "PartNumber").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_unescapes_entities() {
        let body = b"<R><ETag>&quot;abc&quot;</ETag></R>";
        assert_eq!(element_values(body, "ETag").unwrap(), vec!["\"abc\""]);
    }

    #[test]
    fn test_malformed_xml() {
        assert!(element_values(b"<R><Key>a</Nope></R>", "Key").is_err());
    }

    #[test]
    fn test_render_complete_multipart_upload() {
        let xml = render_complete_multipart_upload(&[(1, "\"a\""), (2, "\"b\"")]);
        assert!(xml.starts_with("<CompleteMultipartUpload><Part><PartNumber>1</PartNumber>"));
        let numbers = element_values(xml.as_bytes(), "PartNumber").unwrap();
        assert_eq!(numbers, vec!["1", "2"]);
        assert_eq!(
            element_values(xml.as_bytes(), "ETag").unwrap(),
            vec!["\"a\"", "\"b\""]
        );
    }
}
