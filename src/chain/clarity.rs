//! Clarity value consensus serialization.
//!
//! Read-only contract calls take their arguments and return their result as
//! hex strings of this encoding. Only the value shapes are modeled; type
//! signatures are never needed here.

use std::collections::BTreeMap;
use thiserror::Error;

const TYPE_INT: u8 = 0x00;
const TYPE_UINT: u8 = 0x01;
const TYPE_BUFFER: u8 = 0x02;
const TYPE_TRUE: u8 = 0x03;
const TYPE_FALSE: u8 = 0x04;
const TYPE_STANDARD_PRINCIPAL: u8 = 0x05;
const TYPE_CONTRACT_PRINCIPAL: u8 = 0x06;
const TYPE_RESPONSE_OK: u8 = 0x07;
const TYPE_RESPONSE_ERR: u8 = 0x08;
const TYPE_NONE: u8 = 0x09;
const TYPE_SOME: u8 = 0x0a;
const TYPE_LIST: u8 = 0x0b;
const TYPE_TUPLE: u8 = 0x0c;
const TYPE_STRING_ASCII: u8 = 0x0d;
const TYPE_STRING_UTF8: u8 = 0x0e;

/// Deepest nesting of lists, tuples, optionals and responses Clarity allows.
pub const MAX_DEPTH: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ClarityError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unknown type prefix 0x{0:02x}")]
    UnknownType(u8),
    #[error("invalid utf-8 in string or name")]
    InvalidUtf8,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("value nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarityValue {
    Int(i128),
    UInt(u128),
    Bool(bool),
    Buffer(Vec<u8>),
    Principal {
        version: u8,
        hash160: [u8; 20],
        contract_name: Option<String>,
    },
    ResponseOk(Box<ClarityValue>),
    ResponseErr(Box<ClarityValue>),
    None,
    Some(Box<ClarityValue>),
    List(Vec<ClarityValue>),
    Tuple(BTreeMap<String, ClarityValue>),
    StringAscii(String),
    StringUtf8(String),
}

impl ClarityValue {
    pub fn uint_list(values: impl IntoIterator<Item = u64>) -> Self {
        Self::List(values.into_iter().map(|v| Self::UInt(v as u128)).collect())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// `0x`-prefixed hex of the serialized value.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.serialize()))
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(v) => {
                out.push(TYPE_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::UInt(v) => {
                out.push(TYPE_UINT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Bool(true) => out.push(TYPE_TRUE),
            Self::Bool(false) => out.push(TYPE_FALSE),
            Self::Buffer(bytes) => {
                out.push(TYPE_BUFFER);
                write_len_prefixed(out, bytes);
            }
            Self::Principal {
                version,
                hash160,
                contract_name,
            } => {
                match contract_name {
                    Some(_) => out.push(TYPE_CONTRACT_PRINCIPAL),
                    None => out.push(TYPE_STANDARD_PRINCIPAL),
                }
                out.push(*version);
                out.extend_from_slice(hash160);
                if let Some(name) = contract_name {
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                }
            }
            Self::ResponseOk(inner) => {
                out.push(TYPE_RESPONSE_OK);
                inner.write_to(out);
            }
            Self::ResponseErr(inner) => {
                out.push(TYPE_RESPONSE_ERR);
                inner.write_to(out);
            }
            Self::None => out.push(TYPE_NONE),
            Self::Some(inner) => {
                out.push(TYPE_SOME);
                inner.write_to(out);
            }
            Self::List(items) => {
                out.push(TYPE_LIST);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
            Self::Tuple(fields) => {
                out.push(TYPE_TUPLE);
                out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
                // BTreeMap iteration order is the required lexicographic order
                for (name, value) in fields {
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                    value.write_to(out);
                }
            }
            Self::StringAscii(s) => {
                out.push(TYPE_STRING_ASCII);
                write_len_prefixed(out, s.as_bytes());
            }
            Self::StringUtf8(s) => {
                out.push(TYPE_STRING_UTF8);
                write_len_prefixed(out, s.as_bytes());
            }
        }
    }

    /// Decode a hex string, with or without the `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self, ClarityError> {
        let bytes = hex::decode(raw.trim_start_matches("0x"))?;
        Self::deserialize(&bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ClarityError> {
        let mut reader = Reader {
            bytes,
            pos: 0,
            depth: 0,
        };
        let value = reader.value()?;
        match reader.remaining() {
            0 => Ok(value),
            n => Err(ClarityError::TrailingBytes(n)),
        }
    }

    /// Look through `ok`/`some` wrappers to the underlying value.
    pub fn unwrapped(&self) -> &ClarityValue {
        match self {
            Self::ResponseOk(inner) | Self::Some(inner) => inner.unwrapped(),
            other => other,
        }
    }

    pub fn field(&self, name: &str) -> Option<&ClarityValue> {
        match self.unwrapped() {
            Self::Tuple(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self.unwrapped() {
            Self::UInt(v) => Some(*v),
            Self::Int(v) if *v >= 0 => Some(*v as u128),
            _ => None,
        }
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClarityError> {
        if self.remaining() < n {
            return Err(ClarityError::UnexpectedEnd);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClarityError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ClarityError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u128_bytes(&mut self) -> Result<[u8; 16], ClarityError> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.take(16)?);
        Ok(buf)
    }

    fn string(&mut self, len: usize) -> Result<String, ClarityError> {
        String::from_utf8(self.take(len)?.to_vec()).map_err(|_| ClarityError::InvalidUtf8)
    }

    fn value(&mut self) -> Result<ClarityValue, ClarityError> {
        if self.depth >= MAX_DEPTH {
            return Err(ClarityError::TooDeep);
        }
        self.depth += 1;
        let value = self.value_at_depth();
        self.depth -= 1;
        value
    }

    fn value_at_depth(&mut self) -> Result<ClarityValue, ClarityError> {
        let prefix = self.u8()?;
        let value = match prefix {
            TYPE_INT => ClarityValue::Int(i128::from_be_bytes(self.u128_bytes()?)),
            TYPE_UINT => ClarityValue::UInt(u128::from_be_bytes(self.u128_bytes()?)),
            TYPE_BUFFER => {
                let len = self.u32()? as usize;
                ClarityValue::Buffer(self.take(len)?.to_vec())
            }
            TYPE_TRUE => ClarityValue::Bool(true),
            TYPE_FALSE => ClarityValue::Bool(false),
            TYPE_STANDARD_PRINCIPAL | TYPE_CONTRACT_PRINCIPAL => {
                let version = self.u8()?;
                let mut hash160 = [0u8; 20];
                hash160.copy_from_slice(self.take(20)?);
                let contract_name = if prefix == TYPE_CONTRACT_PRINCIPAL {
                    let len = self.u8()? as usize;
                    Some(self.string(len)?)
                } else {
                    None
                };
                ClarityValue::Principal {
                    version,
                    hash160,
                    contract_name,
                }
            }
            TYPE_RESPONSE_OK => ClarityValue::ResponseOk(Box::new(self.value()?)),
            TYPE_RESPONSE_ERR => ClarityValue::ResponseErr(Box::new(self.value()?)),
            TYPE_NONE => ClarityValue::None,
            TYPE_SOME => ClarityValue::Some(Box::new(self.value()?)),
            TYPE_LIST => {
                let len = self.u32()?;
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(self.value()?);
                }
                ClarityValue::List(items)
            }
            TYPE_TUPLE => {
                let len = self.u32()?;
                let mut fields = BTreeMap::new();
                for _ in 0..len {
                    let name_len = self.u8()? as usize;
                    let name = self.string(name_len)?;
                    fields.insert(name, self.value()?);
                }
                ClarityValue::Tuple(fields)
            }
            TYPE_STRING_ASCII => {
                let len = self.u32()? as usize;
                ClarityValue::StringAscii(self.string(len)?)
            }
            TYPE_STRING_UTF8 => {
                let len = self.u32()? as usize;
                ClarityValue::StringUtf8(self.string(len)?)
            }
            other => return Err(ClarityError::UnknownType(other)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_encoding() {
        assert_eq!(
            ClarityValue::UInt(1).to_hex(),
            "0x0100000000000000000000000000000001"
        );
        assert_eq!(
            ClarityValue::UInt(1000).to_hex(),
            "0x01000000000000000000000000000003e8"
        );
    }

    #[test]
    fn test_mine_many_argument_encoding() {
        let list = ClarityValue::uint_list([30, 30]);
        let hex = list.to_hex();
        assert!(hex.starts_with("0x0b00000002"));
        assert_eq!(hex.len(), 2 + 2 * (1 + 4 + 2 * 17));
    }

    #[test]
    fn test_decode_mining_stats_tuple() {
        // {amount: u700, amountToCity: u0, amountToStackers: u700, minersCount: u3, rewardClaimed: false}
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), ClarityValue::UInt(700));
        fields.insert("amountToCity".to_string(), ClarityValue::UInt(0));
        fields.insert("amountToStackers".to_string(), ClarityValue::UInt(700));
        fields.insert("minersCount".to_string(), ClarityValue::UInt(3));
        fields.insert("rewardClaimed".to_string(), ClarityValue::Bool(false));
        let hex = ClarityValue::Tuple(fields).to_hex();

        let decoded = ClarityValue::from_hex(&hex).unwrap();
        assert_eq!(decoded.field("amount").and_then(|v| v.as_u128()), Some(700));
        assert_eq!(decoded.field("rewardClaimed"), Some(&ClarityValue::Bool(false)));
        assert_eq!(decoded.field("missing"), None);
    }

    #[test]
    fn test_decode_sees_through_ok_and_some() {
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), ClarityValue::UInt(42));
        let wrapped = ClarityValue::ResponseOk(Box::new(ClarityValue::Some(Box::new(
            ClarityValue::Tuple(fields),
        ))));
        let decoded = ClarityValue::from_hex(&wrapped.to_hex()).unwrap();
        assert_eq!(decoded.field("amount").and_then(|v| v.as_u128()), Some(42));
    }

    #[test]
    fn test_decode_contract_principal() {
        let principal = ClarityValue::Principal {
            version: 22,
            hash160: [7u8; 20],
            contract_name: Some("miamicoin-core-v1".into()),
        };
        assert_eq!(ClarityValue::from_hex(&principal.to_hex()).unwrap(), principal);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            ClarityValue::from_hex("0x01000000"),
            Err(ClarityError::UnexpectedEnd)
        );
        assert_eq!(ClarityValue::from_hex("0x20"), Err(ClarityError::UnknownType(0x20)));
        assert_eq!(ClarityValue::from_hex("0x0303"), Err(ClarityError::TrailingBytes(1)));
        assert!(matches!(ClarityValue::from_hex("0xzz"), Err(ClarityError::Hex(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |wrappers: usize| {
            let mut bytes = vec![TYPE_SOME; wrappers];
            bytes.push(TYPE_TRUE);
            ClarityValue::deserialize(&bytes)
        };
        assert!(nested(MAX_DEPTH - 1).is_ok());
        assert_eq!(nested(MAX_DEPTH), Err(ClarityError::TooDeep));
        assert_eq!(nested(1_000_000), Err(ClarityError::TooDeep));

        // a list of lists nests the same way
        let mut bytes = Vec::new();
        for _ in 0..MAX_DEPTH {
            bytes.push(TYPE_LIST);
            bytes.extend_from_slice(&1u32.to_be_bytes());
        }
        bytes.push(TYPE_NONE);
        assert_eq!(ClarityValue::deserialize(&bytes), Err(ClarityError::TooDeep));
    }
}
