use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ecc::{EccSpec, ErrorCorrectingCode};
use super::huffman::{CodeTable, CodeTableState};
use super::CodingError;

const MAGIC: &[u8; 4] = b"TRLC";
const VERSION: u8 = 1;
/// magic(4) + version(1) + reserved(3) + payload_len(4) + crc32(4).
const HEADER_SIZE: usize = 16;

/// The structural half of a trained model: code table and codec parameters,
/// everything needed to reproduce decode behavior without the scorer's
/// weights. Learned weights are persisted by the training framework in its
/// own format; the two halves version independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralState {
    pub original_bits: u32,
    pub encoded_bits: u32,
    pub ecc: EccSpec,
    pub code_table: CodeTableState,
}

impl StructuralState {
    /// Snapshot a live table/codec pair.
    pub fn capture(code: &CodeTable, ecc: &dyn ErrorCorrectingCode) -> Self {
        let original_bits = code.num_bits();
        Self {
            original_bits: original_bits as u32,
            encoded_bits: ecc.encoded_bits(original_bits) as u32,
            ecc: ecc.spec(),
            code_table: code.state(),
        }
    }

    /// Rebuild the table and codec, re-checking cross-field consistency.
    pub fn restore(&self) -> Result<(CodeTable, Arc<dyn ErrorCorrectingCode>), CodingError> {
        let code = CodeTable::from_state(&self.code_table)?;
        if code.num_bits() != self.original_bits as usize {
            return Err(CodingError::Corrupted(format!(
                "code table is {} bits wide, record claims {}",
                code.num_bits(),
                self.original_bits
            )));
        }
        let ecc = self.ecc.build()?;
        if ecc.encoded_bits(code.num_bits()) != self.encoded_bits as usize {
            return Err(CodingError::Corrupted(format!(
                "codec produces {} encoded bits, record claims {}",
                ecc.encoded_bits(code.num_bits()),
                self.encoded_bits
            )));
        }
        Ok((code, ecc))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodingError> {
        let payload = bincode::serialize(self).map_err(CodingError::Serialize)?;
        let payload_len: u32 = payload
            .len()
            .try_into()
            .map_err(|_| CodingError::Config("structural payload exceeds u32::MAX".into()))?;
        let crc = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&[0u8; 3]); // reserved
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodingError> {
        if data.len() < 5 {
            return Err(CodingError::InvalidHeader);
        }
        if &data[..4] != MAGIC {
            return Err(CodingError::InvalidMagic);
        }
        if data[4] != VERSION {
            return Err(CodingError::UnsupportedVersion(data[4]));
        }
        if data.len() < HEADER_SIZE {
            return Err(CodingError::InvalidHeader);
        }

        let payload_len = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(data[12..16].try_into().unwrap());
        if data.len() < HEADER_SIZE + payload_len {
            return Err(CodingError::Corrupted(format!(
                "payload truncated: {} of {payload_len} bytes",
                data.len() - HEADER_SIZE
            )));
        }

        let payload = &data[HEADER_SIZE..HEADER_SIZE + payload_len];
        if crc32fast::hash(payload) != crc {
            return Err(CodingError::Corrupted("payload checksum mismatch".into()));
        }

        bincode::deserialize(payload).map_err(CodingError::Deserialize)
    }

    pub fn save(&self, path: &Path) -> Result<(), CodingError> {
        Ok(fs::write(path, self.to_bytes()?)?)
    }

    pub fn load(path: &Path) -> Result<Self, CodingError> {
        Self::from_bytes(&fs::read(path)?)
    }
}
