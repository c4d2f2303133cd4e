//! In-band keyframe detection for H.264 Annex-B bitstreams
//!
//! Some encoders leave the declared key flag unset on IDR output, so the
//! capture pipeline double-checks H.264 chunks by looking at NAL unit types.

/// Coded slice of an IDR picture
pub const NAL_IDR_SLICE: u8 = 5;

/// Sequence parameter set
pub const NAL_SPS: u8 = 7;

/// Iterate over the NAL unit type of every unit in an Annex-B buffer
pub fn nal_unit_types(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    let mut i = 0usize;
    std::iter::from_fn(move || {
        while i + 3 < data.len() {
            // 3-byte start code; the 4-byte form ends in the same three bytes
            if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
                let header = data[i + 3];
                i += 4;
                return Some(header & 0x1F);
            }
            i += 1;
        }
        None
    })
}

/// True when the buffer carries an IDR slice or an SPS
pub fn contains_keyframe(data: &[u8]) -> bool {
    nal_unit_types(data).any(|t| t == NAL_IDR_SLICE || t == NAL_SPS)
}
