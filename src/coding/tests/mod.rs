use std::sync::Arc;

use crate::coding::{
    CodeTable, CodingError, EccSpec, IdentityCode, RepetitionCode, StructuralState,
};

fn sample_table() -> CodeTable {
    let freqs: Vec<(u32, u64)> = (0..50).map(|id| (id, 100 - id as u64)).collect();
    CodeTable::from_frequencies(&freqs).unwrap()
}

#[test]
fn structural_state_round_trips_through_bytes() {
    let table = sample_table();
    let ecc = RepetitionCode::new(3).unwrap();
    let state = StructuralState::capture(&table, &ecc);
    assert_eq!(state.original_bits as usize, table.num_bits());
    assert_eq!(state.encoded_bits as usize, table.num_bits() * 3);

    let bytes = state.to_bytes().unwrap();
    let reloaded = StructuralState::from_bytes(&bytes).unwrap();
    let (code, codec) = reloaded.restore().unwrap();

    assert_eq!(code.num_bits(), table.num_bits());
    assert_eq!(codec.encoded_bits(code.num_bits()), table.num_bits() * 3);
    for id in 0..50 {
        let bits = table.get_code(id).unwrap();
        assert_eq!(code.get_code(id).unwrap(), bits);
        assert_eq!(code.get_id(bits), id);
    }
}

#[test]
fn save_and_load_via_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("structure.trlc");

    let table = sample_table();
    let state = StructuralState::capture(&table, &IdentityCode);
    state.save(&path).unwrap();

    let reloaded = StructuralState::load(&path).unwrap();
    let (code, codec) = reloaded.restore().unwrap();
    assert_eq!(code.vocab_size(), 50);
    assert_eq!(codec.spec(), EccSpec::Identity);
}

#[test]
fn rejects_wrong_magic_and_version() {
    let state = StructuralState::capture(&sample_table(), &IdentityCode);
    let good = state.to_bytes().unwrap();

    let mut wrong_magic = good.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        StructuralState::from_bytes(&wrong_magic),
        Err(CodingError::InvalidMagic)
    ));

    let mut wrong_version = good.clone();
    wrong_version[4] = 9;
    assert!(matches!(
        StructuralState::from_bytes(&wrong_version),
        Err(CodingError::UnsupportedVersion(9))
    ));

    assert!(matches!(
        StructuralState::from_bytes(&good[..3]),
        Err(CodingError::InvalidHeader)
    ));
}

#[test]
fn rejects_flipped_payload_bytes() {
    let state = StructuralState::capture(&sample_table(), &IdentityCode);
    let mut bytes = state.to_bytes().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    assert!(matches!(
        StructuralState::from_bytes(&bytes),
        Err(CodingError::Corrupted(_))
    ));
}

#[test]
fn rejects_truncated_payload() {
    let state = StructuralState::capture(&sample_table(), &IdentityCode);
    let bytes = state.to_bytes().unwrap();
    assert!(matches!(
        StructuralState::from_bytes(&bytes[..bytes.len() - 4]),
        Err(CodingError::Corrupted(_))
    ));
}

#[test]
fn restore_cross_checks_bit_counts() {
    let table = sample_table();
    let ecc = RepetitionCode::new(3).unwrap();

    let mut state = StructuralState::capture(&table, &ecc);
    state.encoded_bits += 1;
    assert!(matches!(
        state.restore(),
        Err(CodingError::Corrupted(_))
    ));

    let mut state = StructuralState::capture(&table, &ecc);
    state.original_bits += 1;
    assert!(matches!(
        state.restore(),
        Err(CodingError::Corrupted(_))
    ));
}

#[test]
fn restored_codec_is_shareable() {
    let state = StructuralState::capture(&sample_table(), &RepetitionCode::new(2).unwrap());
    let (_, codec) = state.restore().unwrap();
    let other: Arc<dyn crate::coding::ErrorCorrectingCode> = Arc::clone(&codec);
    assert_eq!(other.encoded_bits(10), 20);
}
