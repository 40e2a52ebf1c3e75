pub mod codec;
pub mod value;

pub use codec::{
    build_convert_call, build_ping_call, decode_method_response, encode_method_call, extract_xml_document,
    Fault, MethodCall,
};
pub use value::Value;
