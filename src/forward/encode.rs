use super::ForwardError;
use crate::tenant::MessageFormat;
use serde::Serialize;

#[derive(Serialize)]
struct JsonMessage<'a> {
    tenant: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename = "Message")]
struct XmlMessage<'a> {
    #[serde(rename = "Tenant")]
    tenant: &'a str,
    #[serde(rename = "Content")]
    content: &'a str,
}

/// Encoded outbound request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// Encode `{tenant, message}` for the tenant's endpoint. Text bodies carry the
/// raw bytes; JSON and XML replace invalid UTF-8 sequences.
pub fn encode_body(
    format: MessageFormat,
    tenant: &str,
    message: &[u8],
) -> Result<EncodedBody, ForwardError> {
    let body = match format {
        MessageFormat::Json => {
            let text = String::from_utf8_lossy(message);
            serde_json::to_vec(&JsonMessage {
                tenant,
                message: &text,
            })?
        }
        MessageFormat::Xml => {
            let text = String::from_utf8_lossy(message);
            quick_xml::se::to_string(&XmlMessage {
                tenant,
                content: &text,
            })
            .map_err(|e| ForwardError::Encode(e.to_string()))?
            .into_bytes()
        }
        MessageFormat::Text => message.to_vec(),
    };

    Ok(EncodedBody {
        content_type: format.content_type(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_body() {
        let encoded = encode_body(MessageFormat::Json, "acme", b"hello").unwrap();
        assert_eq!(encoded.content_type, "application/json");

        let value: serde_json::Value = serde_json::from_slice(&encoded.body).unwrap();
        assert_eq!(value["tenant"], "acme");
        assert_eq!(value["message"], "hello");
    }

    #[test]
    fn test_xml_body_escapes_content() {
        let encoded = encode_body(MessageFormat::Xml, "acme", b"a<b").unwrap();
        assert_eq!(encoded.content_type, "application/xml");
        assert_eq!(
            String::from_utf8(encoded.body).unwrap(),
            "<Message><Tenant>acme</Tenant><Content>a&lt;b</Content></Message>"
        );
    }

    #[test]
    fn test_text_body_is_raw() {
        let encoded = encode_body(MessageFormat::Text, "acme", &[0xff, b'x']).unwrap();
        assert_eq!(encoded.content_type, "text/plain");
        assert_eq!(encoded.body, vec![0xff, b'x']);
    }
}
