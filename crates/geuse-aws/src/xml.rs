//! Minimal helpers for AWS XML responses.
//!
//! Everything is built on one primitive: [`xml_blocks`] slices out the raw
//! inner XML of matching elements, and the text accessors parse those
//! fragments. This keeps the awkward part (nested same-name elements, as in
//! EC2 `<item>` sets) in a single place.

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader as XmlReader;

/// Raw inner XML of each top-level `<tag>` element, anywhere in the input.
/// A `<tag>` nested inside another `<tag>` stays part of the outer block.
pub fn xml_blocks(xml: &str, tag: &str) -> Vec<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    let mut blocks = Vec::new();
    let mut block_start: Option<usize> = None;
    let mut nested: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == tag_bytes => {
                if block_start.is_none() {
                    block_start = Some(reader.buffer_position() as usize);
                } else {
                    nested += 1;
                }
            }
            Ok(XmlEvent::End(e)) if e.local_name().as_ref() == tag_bytes => {
                if let Some(start) = block_start {
                    if nested == 0 {
                        // buffer_position is past "</tag>".
                        let end = reader.buffer_position() as usize - (tag.len() + 3);
                        blocks.push(xml[start..end].to_string());
                        block_start = None;
                    } else {
                        nested -= 1;
                    }
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    blocks
}

/// First unescaped text node sitting directly inside a fragment, skipping
/// anything wrapped in a child element.
fn direct_text(fragment: &str) -> Option<String> {
    let mut reader = XmlReader::from_str(fragment);
    reader.config_mut().trim_text(true);
    let mut child_depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(_)) => child_depth += 1,
            Ok(XmlEvent::End(_)) => child_depth = child_depth.saturating_sub(1),
            Ok(XmlEvent::Text(t)) if child_depth == 0 => {
                return t
                    .unescape()
                    .ok()
                    .map(|s| s.into_owned())
                    .filter(|s| !s.is_empty());
            }
            Ok(XmlEvent::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Text content of the first `<tag>` element, or `None` when the element is
/// absent, empty, or holds only child elements.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    xml_blocks(xml, tag)
        .into_iter()
        .next()
        .and_then(|block| direct_text(&block))
}

/// Text content of every `<tag>` element that carries direct text.
pub fn xml_all_texts(xml: &str, tag: &str) -> Vec<String> {
    xml_blocks(xml, tag)
        .iter()
        .filter_map(|block| direct_text(block))
        .collect()
}

/// Error code of an AWS XML error response, whichever casing the service
/// uses.
pub fn xml_error_code(xml: &str) -> String {
    ["Code", "code"]
        .into_iter()
        .find_map(|tag| xml_text(xml, tag))
        .unwrap_or_else(|| "Unknown".into())
}

/// Error message of an AWS XML error response.
pub fn xml_error_message(xml: &str) -> String {
    ["Message", "message"]
        .into_iter()
        .find_map(|tag| xml_text(xml, tag))
        .unwrap_or_else(|| "unknown error".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBNETS: &str = r#"<DescribeSubnetsResponse>
      <subnetSet>
        <item>
          <subnetId>subnet-1</subnetId>
          <availabilityZone>us-east-1a</availabilityZone>
          <tagSet><item><key>Name</key><value>a</value></item></tagSet>
        </item>
        <item>
          <subnetId>subnet-2</subnetId>
          <availabilityZone>us-east-1b</availabilityZone>
        </item>
      </subnetSet>
    </DescribeSubnetsResponse>"#;

    #[test]
    fn xml_text_finds_first_match() {
        assert_eq!(xml_text(SUBNETS, "subnetId").as_deref(), Some("subnet-1"));
        assert_eq!(xml_text(SUBNETS, "absent"), None);
    }

    #[test]
    fn xml_text_skips_elements_without_direct_text() {
        let xml = "<outer><inner>value</inner></outer>";
        assert_eq!(xml_text(xml, "outer"), None);
        assert_eq!(xml_text(xml, "inner").as_deref(), Some("value"));
        assert_eq!(xml_text("<empty></empty>", "empty"), None);
    }

    #[test]
    fn xml_text_unescapes_entities() {
        let xml = "<Message>does not exist &amp; cannot be used</Message>";
        assert_eq!(
            xml_text(xml, "Message").as_deref(),
            Some("does not exist & cannot be used")
        );
    }

    #[test]
    fn xml_all_texts_collects_every_match() {
        assert_eq!(xml_all_texts(SUBNETS, "subnetId"), vec!["subnet-1", "subnet-2"]);
    }

    #[test]
    fn xml_blocks_handles_nested_same_tag() {
        let items = xml_blocks(SUBNETS, "item");
        // Two top-level subnet items; the nested tag item stays inside its block.
        assert_eq!(items.len(), 2);
        assert!(items[0].contains("<subnetId>subnet-1</subnetId>"));
        assert!(items[0].contains("<tagSet>"));
        assert!(items[1].contains("subnet-2"));
        assert_eq!(xml_text(&items[0], "availabilityZone").as_deref(), Some("us-east-1a"));
    }

    #[test]
    fn error_helpers_read_code_and_message() {
        let err = "<Response><Errors><Error><Code>InvalidVpcID.NotFound</Code><Message>does not exist</Message></Error></Errors></Response>";
        assert_eq!(xml_error_code(err), "InvalidVpcID.NotFound");
        assert_eq!(xml_error_message(err), "does not exist");
        assert_eq!(xml_error_code(""), "Unknown");
        assert_eq!(xml_error_message(""), "unknown error");
    }
}
