/// `methodCall`/`methodResponse` framing around the [`Value`] grammar, plus
/// the fixed parameter tuple for the `convert` call (see external interfaces,
/// §6 of the design).
use crate::error::RlbError;
use crate::wire::value::{decode_value, encode_value, Value};
use quick_xml::events::Event;
use quick_xml::Reader;

pub struct MethodCall {
    pub method_name: String,
    pub params: Vec<Value>,
}

pub fn encode_method_call(call: &MethodCall) -> String {
    let mut out = String::from(r#"<?xml version="1.0"?><methodCall><methodName>"#);
    out.push_str(&call.method_name);
    out.push_str("</methodName><params>");
    for param in &call.params {
        out.push_str("<param>");
        out.push_str(&encode_value(param));
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// The order-sensitive `convert` call parameter tuple.
///
/// Stream mode: params 1 (`inpath`) and 3 (`outpath`) are nil, param 2
/// (`indata`) carries the base64-encoded input. FilePath mode: param 1 is the
/// input path, param 3 the output path, param 2 is nil.
pub fn build_convert_call(
    input_path: Option<&str>,
    input_base64: Option<&str>,
    output_path: Option<&str>,
    convert_to: &str,
) -> MethodCall {
    let params = vec![
        input_path.map(|p| Value::String(p.to_string())).unwrap_or(Value::Nil),
        input_base64.map(|b| Value::Base64(b.to_string())).unwrap_or(Value::Nil),
        output_path.map(|p| Value::String(p.to_string())).unwrap_or(Value::Nil),
        Value::String(convert_to.to_string()),
        Value::Nil,
        Value::Array(Vec::new()),
        Value::Bool(true),
        Value::Nil,
    ];
    MethodCall {
        method_name: "convert".to_string(),
        params,
    }
}

pub fn build_ping_call(method_name: &str) -> MethodCall {
    MethodCall {
        method_name: method_name.to_string(),
        params: Vec::new(),
    }
}

/// Fault carried by a `methodResponse` with a `<fault>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

/// Decode a `methodResponse` document: a `<fault>` surfaces as `Err`, otherwise
/// the first `<param><value>` is decoded and returned.
pub fn decode_method_response(xml: &str) -> Result<Value, RlbError> {
    let body = extract_xml_document(xml)?;
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| RlbError::MalformedResponse(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"fault" => {
                expect_value_open(&mut reader, &mut buf)?;
                let value = decode_value(&mut reader, &mut buf)?;
                let fault = fault_from_struct(&value)?;
                return Err(RlbError::UpstreamError {
                    code: fault.code,
                    message: fault.message,
                });
            }
            Event::Start(e) if e.name().as_ref() == b"param" => {
                expect_value_open(&mut reader, &mut buf)?;
                return decode_value(&mut reader, &mut buf);
            }
            Event::Eof => {
                return Err(RlbError::MalformedResponse(
                    "methodResponse has no params and no fault".into(),
                ))
            }
            _ => continue,
        }
    }
}

fn expect_value_open(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>) -> Result<(), RlbError> {
    loop {
        match reader
            .read_event_into(buf)
            .map_err(|e| RlbError::MalformedResponse(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"value" => return Ok(()),
            Event::Eof => {
                return Err(RlbError::MalformedResponse("expected <value>, found eof".into()))
            }
            _ => continue,
        }
    }
}

fn fault_from_struct(value: &Value) -> Result<Fault, RlbError> {
    let code = value
        .struct_member("faultCode")
        .and_then(Value::as_int)
        .ok_or_else(|| RlbError::MalformedResponse("fault missing faultCode".into()))?;
    let message = value
        .struct_member("faultString")
        .and_then(Value::as_str)
        .ok_or_else(|| RlbError::MalformedResponse("fault missing faultString".into()))?
        .to_string();
    Ok(Fault { code, message })
}

/// Slice the XML-RPC document out of a raw HTTP response body: from the first
/// `<?xml` to the end of the first `</methodResponse>` (17 bytes, counted
/// inclusive of the closing angle bracket).
const METHOD_RESPONSE_CLOSE: &str = "</methodResponse>";

pub fn extract_xml_document(body: &str) -> Result<&str, RlbError> {
    let start = body
        .find("<?xml")
        .ok_or_else(|| RlbError::MalformedResponse("no <?xml declaration found in response".into()))?;
    let close_rel = body[start..]
        .find(METHOD_RESPONSE_CLOSE)
        .ok_or_else(|| RlbError::MalformedResponse("no </methodResponse> terminator found".into()))?;
    let end = start + close_rel + METHOD_RESPONSE_CLOSE.len();
    Ok(&body[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_call_filepath_mode_param_order() {
        let call = build_convert_call(Some("/a.odt"), None, Some("/a.pdf"), "pdf");
        let xml = encode_method_call(&call);
        assert!(xml.contains("<methodName>convert</methodName>"));
        assert_eq!(call.params.len(), 8);
        assert_eq!(call.params[0], Value::String("/a.odt".to_string()));
        assert_eq!(call.params[1], Value::Nil);
        assert_eq!(call.params[2], Value::String("/a.pdf".to_string()));
        assert_eq!(call.params[3], Value::String("pdf".to_string()));
        assert_eq!(call.params[6], Value::Bool(true));
    }

    #[test]
    fn convert_call_stream_mode_param_order() {
        let call = build_convert_call(None, Some("SGVsbG8="), None, "pdf");
        assert_eq!(call.params[0], Value::Nil);
        assert_eq!(call.params[1], Value::Base64("SGVsbG8=".to_string()));
        assert_eq!(call.params[2], Value::Nil);
    }

    #[test]
    fn decode_success_response() {
        let body = concat!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n",
            r#"<?xml version="1.0"?><methodResponse><params><param>"#,
            r#"<value><base64>SGVsbG8=</base64></value></param></params></methodResponse>"#
        );
        let value = decode_method_response(body).unwrap();
        assert_eq!(value, Value::Base64("SGVsbG8=".to_string()));
    }

    #[test]
    fn decode_fault_response() {
        let body = concat!(
            "HTTP/1.1 200 OK\r\n\r\n",
            r#"<?xml version="1.0"?><methodResponse><fault><value><struct>"#,
            r#"<member><name>faultCode</name><value><int>1</int></value></member>"#,
            r#"<member><name>faultString</name><value><string>bad</string></value></member>"#,
            r#"</struct></value></fault></methodResponse>"#
        );
        let err = decode_method_response(body).unwrap_err();
        match err {
            RlbError::UpstreamError { code, message } => {
                assert_eq!(code, 1);
                assert_eq!(message, "bad");
            }
            other => panic!("expected UpstreamError, got {:?}", other),
        }
    }
}
