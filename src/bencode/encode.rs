//! Canonical bencode encoder

use bytes::BufMut;

use crate::bencode::value::BencodeValue;

/// Encode a value into its canonical bencoding
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

/// Append the canonical bencoding of `value` to `buf`
pub fn encode_into(value: &BencodeValue, buf: &mut Vec<u8>) {
    match value {
        BencodeValue::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        BencodeValue::ByteString(bytes) => encode_bytes(bytes, buf),
        BencodeValue::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        BencodeValue::Dictionary(dict) => {
            // BTreeMap iterates keys in ascending byte order
            buf.put_u8(b'd');
            for (key, item) in dict {
                encode_bytes(key, buf);
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}

impl BencodeValue {
    /// Canonical bencoding of this value
    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode::{decode, decode_all};
    use crate::bencode::value::BencodeDict;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&BencodeValue::Integer(0)), b"i0e");
        assert_eq!(encode(&BencodeValue::Integer(-42)), b"i-42e");
        assert_eq!(encode(&BencodeValue::Integer(i64::MIN)), b"i-9223372036854775808e");
        assert_eq!(encode(&BencodeValue::from("hello")), b"5:hello");
        assert_eq!(encode(&BencodeValue::bytes(Vec::new())), b"0:");
    }

    #[test]
    fn test_encode_list_keeps_order() {
        let list = BencodeValue::from(vec![BencodeValue::from("spam"), BencodeValue::Integer(42)]);
        assert_eq!(encode(&list), b"l4:spami42ee");
    }

    #[test]
    fn test_dictionary_keys_sorted_regardless_of_insertion() {
        let mut forward = BencodeDict::new();
        forward.insert(b"cow".to_vec(), BencodeValue::from("moo"));
        forward.insert(b"spam".to_vec(), BencodeValue::from("eggs"));
        forward.insert(b"Zed".to_vec(), BencodeValue::Integer(1));

        let mut backward = BencodeDict::new();
        backward.insert(b"Zed".to_vec(), BencodeValue::Integer(1));
        backward.insert(b"spam".to_vec(), BencodeValue::from("eggs"));
        backward.insert(b"cow".to_vec(), BencodeValue::from("moo"));

        let a = encode(&BencodeValue::from(forward));
        let b = encode(&BencodeValue::from(backward));
        assert_eq!(a, b);
        // 'Z' (0x5a) sorts before lowercase letters
        assert_eq!(a, b"d3:Zedi1e3:cow3:moo4:spam4:eggse");
    }

    #[test]
    fn test_dictionary_sorted_by_raw_bytes() {
        let mut dict = BencodeDict::new();
        dict.insert(vec![0xff], BencodeValue::Integer(2));
        dict.insert(vec![0x01, 0xff], BencodeValue::Integer(1));
        dict.insert(vec![0x01], BencodeValue::Integer(0));
        assert_eq!(encode(&BencodeValue::from(dict)), b"d1:\x01i0e2:\x01\xffi1e1:\xffi2ee");
    }

    #[test]
    fn test_canonical_input_is_reproduced() {
        let inputs: [&[u8]; 5] = [
            b"d3:cow3:moo4:spam4:eggse",
            b"l4:spami42ee",
            b"d4:infod6:lengthi20e4:name4:test12:piece lengthi10eee",
            b"li-1ei0ed0:0:ee",
            b"5:hello",
        ];
        for input in inputs {
            let (value, consumed) = decode(input, 0).unwrap();
            assert_eq!(consumed, input.len());
            assert_eq!(encode(&value), input);
        }
    }

    #[test]
    fn test_decode_of_encode_is_identity() {
        let mut inner = BencodeDict::new();
        inner.insert(b"blob".to_vec(), BencodeValue::bytes(vec![0u8, 1, 2, 255]));
        inner.insert(b"n".to_vec(), BencodeValue::Integer(-7));
        let value = BencodeValue::from(vec![
            BencodeValue::from(inner),
            BencodeValue::List(Vec::new()),
            BencodeValue::Integer(1 << 40),
        ]);
        assert_eq!(decode_all(&value.encode()).unwrap(), value);
    }

    #[test]
    fn test_unsorted_input_is_canonicalised() {
        let value = decode_all(b"d4:spam4:eggs3:cow3:mooe").unwrap();
        assert_eq!(encode(&value), b"d3:cow3:moo4:spam4:eggse");
    }
}
