//! Bencode value model

use std::collections::BTreeMap;

/// Bencode dictionary, ordered by raw key bytes
pub type BencodeDict = BTreeMap<Vec<u8>, BencodeValue>;

/// A decoded bencode value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Integer(i64),
    ByteString(Vec<u8>),
    List(Vec<BencodeValue>),
    Dictionary(BencodeDict),
}

impl BencodeValue {
    /// Build a byte string value
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        BencodeValue::ByteString(data.into())
    }

    /// Short name of the value's tag, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BencodeValue::Integer(_) => "integer",
            BencodeValue::ByteString(_) => "byte string",
            BencodeValue::List(_) => "list",
            BencodeValue::Dictionary(_) => "dictionary",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::ByteString(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string contents if they are valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BencodeDict> {
        match self {
            BencodeValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key when this value is a dictionary
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Render the value as JSON.
    ///
    /// Byte strings become (lossy) UTF-8 strings and dictionary keys are
    /// emitted in their canonical order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BencodeValue::Integer(i) => serde_json::Value::from(*i),
            BencodeValue::ByteString(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            BencodeValue::List(items) => serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect()),
            BencodeValue::Dictionary(dict) => {
                let map = dict
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(map)
            }
        }
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::ByteString(value.as_bytes().to_vec())
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(value: Vec<BencodeValue>) -> Self {
        BencodeValue::List(value)
    }
}

impl From<BencodeDict> for BencodeValue {
    fn from(value: BencodeDict) -> Self {
        BencodeValue::Dictionary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_tag() {
        let v = BencodeValue::Integer(7);
        assert_eq!(v.as_int(), Some(7));
        assert!(v.as_bytes().is_none());
        assert!(v.as_list().is_none());
        assert!(v.as_dict().is_none());
        assert_eq!(v.kind(), "integer");
    }

    #[test]
    fn test_as_str_rejects_invalid_utf8() {
        let v = BencodeValue::bytes(vec![0xff, 0xfe]);
        assert!(v.as_str().is_none());
        assert_eq!(v.as_bytes(), Some(&[0xff, 0xfe][..]));
    }

    #[test]
    fn test_get_on_dictionary() {
        let mut dict = BencodeDict::new();
        dict.insert(b"cow".to_vec(), BencodeValue::from("moo"));
        let v = BencodeValue::from(dict);
        assert_eq!(v.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
        assert!(v.get(b"pig").is_none());
        assert!(BencodeValue::Integer(1).get(b"cow").is_none());
    }

    #[test]
    fn test_to_json() {
        let mut dict = BencodeDict::new();
        dict.insert(b"spam".to_vec(), BencodeValue::from(vec![BencodeValue::from("a"), BencodeValue::Integer(1)]));
        let json = BencodeValue::from(dict).to_json();
        assert_eq!(json.to_string(), r#"{"spam":["a",1]}"#);
    }
}
