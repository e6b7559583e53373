use strata_types::error::{Result, StrataError};

/// Object type tags for the repository envelope format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Blob = 1,
    Tree = 2,
    Snapshot = 3,
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Blob),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Snapshot),
            _ => Err(StrataError::InvalidFormat(format!(
                "unknown object type tag: {v}"
            ))),
        }
    }
}

/// Length of the envelope header preceding every payload.
pub const ENVELOPE_HEADER_LEN: u64 = 1;

/// Wire format: `[1-byte type_tag][payload]`.
///
/// Object ids are computed over the payload alone, so the same bytes stored
/// as different types would still dedup to one id; the tag only guards
/// against reading an object as the wrong kind.
pub fn pack_object(obj_type: ObjectType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(obj_type as u8);
    out.extend_from_slice(payload);
    out
}

/// Split an envelope and check it carries the expected type.
pub fn unpack_object_expect(data: &[u8], expected: ObjectType) -> Result<&[u8]> {
    let Some((&tag, payload)) = data.split_first() else {
        return Err(StrataError::InvalidFormat("empty object".into()));
    };
    let actual = ObjectType::from_u8(tag)?;
    if actual != expected {
        return Err(StrataError::InvalidFormat(format!(
            "expected {expected:?} object, found {actual:?}"
        )));
    }
    Ok(payload)
}
