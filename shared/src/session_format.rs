use bincode::{Decode, Encode};
use thiserror::Error;

use crate::document::StoredDocument;

pub const COLLECTION_FILE_MAGIC: [u8; 4] = *b"IBCL";
pub const COLLECTION_FILE_VERSION: u32 = 1;
const COLLECTION_HEADER_LEN: usize = COLLECTION_FILE_MAGIC.len() + std::mem::size_of::<u32>();

#[derive(Clone, Debug, Default, PartialEq, Encode, Decode, serde::Serialize, serde::Deserialize)]
pub struct CollectionFileData {
    pub documents: Vec<StoredDocument>,
}

#[derive(Debug, Error)]
pub enum CollectionFileError {
    #[error("unsupported collection file version {0}")]
    UnsupportedVersion(u32),
    #[error("not a collection file")]
    InvalidHeader,
    #[error("failed to encode collection file: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode collection file: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub fn encode_collection_file(data: &CollectionFileData) -> Result<Vec<u8>, CollectionFileError> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&COLLECTION_FILE_MAGIC);
    payload.extend_from_slice(&COLLECTION_FILE_VERSION.to_le_bytes());
    let body = bincode::encode_to_vec(data, bincode::config::standard())?;
    payload.extend_from_slice(&body);
    Ok(payload)
}

pub fn decode_collection_file(payload: &[u8]) -> Result<CollectionFileData, CollectionFileError> {
    if !(payload.len() >= COLLECTION_HEADER_LEN && payload.starts_with(&COLLECTION_FILE_MAGIC)) {
        return Err(CollectionFileError::InvalidHeader);
    }
    let version = u32::from_le_bytes(
        payload[COLLECTION_FILE_MAGIC.len()..COLLECTION_HEADER_LEN]
            .try_into()
            .map_err(|_| CollectionFileError::InvalidHeader)?,
    );
    let body = &payload[COLLECTION_HEADER_LEN..];
    match version {
        1 => {
            let (data, _) = bincode::decode_from_slice(body, bincode::config::standard())?;
            Ok(data)
        }
        _ => Err(CollectionFileError::UnsupportedVersion(version)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::record::{encode_segment, DrawRecord};
    use crate::Point;

    #[test]
    fn collection_file_round_trips_documents() {
        let mut collection = Collection::new();
        let segment = encode_segment(
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            "#123456",
            4.0,
            "u",
        )
        .unwrap();
        collection.insert(DrawRecord::Segment(segment).to_document(), 42);
        let data = CollectionFileData {
            documents: collection.documents().to_vec(),
        };
        let payload = encode_collection_file(&data).unwrap();
        assert!(payload.starts_with(b"IBCL"));
        assert_eq!(decode_collection_file(&payload).unwrap(), data);
    }

    #[test]
    fn rejects_foreign_and_future_files() {
        assert!(matches!(
            decode_collection_file(b"PK\x03\x04rest"),
            Err(CollectionFileError::InvalidHeader)
        ));
        let mut payload = COLLECTION_FILE_MAGIC.to_vec();
        payload.extend_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode_collection_file(&payload),
            Err(CollectionFileError::UnsupportedVersion(7))
        ));
    }
}
