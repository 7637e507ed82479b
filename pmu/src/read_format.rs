use crate::{Error, Result};

// Wire layout of a grouped read with PERF_FORMAT_GROUP | PERF_FORMAT_ID:
// a u64 entry count, then (u64 value, u64 id) pairs, native byte order.
// The kernel returns the pairs in no particular order.
const HEADER_LEN: usize = 8;
const PAIR_LEN: usize = 16;

pub(crate) fn grouped_read_size(counters: usize) -> usize {
    HEADER_LEN + counters * PAIR_LEN
}

/// Scatters a grouped-read payload back to creation order.
///
/// `ids[i]` holds the facility id recorded for the counter in slot `i`,
/// leader first. A payload carrying fewer entries than recorded ids is a
/// short read and fails; entries with an unknown id belong to counters this
/// session never opened and are skipped.
pub(crate) fn demux(payload: &[u8], ids: &[u64]) -> Result<Vec<u64>> {
    let expected = ids.len();
    if payload.len() < HEADER_LEN {
        return Err(Error::ShortRead { got: 0, expected });
    }

    let nr = read_u64(payload, 0) as usize;
    let available = (payload.len() - HEADER_LEN) / PAIR_LEN;
    let got = nr.min(available);
    if got < expected {
        return Err(Error::ShortRead { got, expected });
    }

    let mut values = vec![0u64; expected];
    for i in 0..got {
        let off = HEADER_LEN + i * PAIR_LEN;
        let value = read_u64(payload, off);
        let id = read_u64(payload, off + 8);
        if let Some(slot) = ids.iter().position(|&known| known == id) {
            values[slot] = value;
        }
    }

    Ok(values)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap())
}
