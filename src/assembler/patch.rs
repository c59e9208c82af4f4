//! IPS patch hunks: append, simplify, serialize.
//!
//! During assembly the hunk list doubles as the committed-byte store, so
//! compare-on-write and header read-back work the same way they do against
//! a real file. Hunks are appended in write order; before emission the list
//! is rewritten into a minimal position-sorted sequence where later writes
//! win over earlier ones.

/// Runs of at least this many identical bytes become RLE hunks.
const RLE_THRESHOLD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkData {
    Literal(Vec<u8>),
    Rle { length: usize, value: u8 },
}

#[derive(Debug, Clone)]
pub struct Hunk {
    pub offset: i64,
    pub data: HunkData,
    /// Hidden from emission, but still consulted for read-back.
    pub suppressed: bool,
}

impl Hunk {
    pub fn len(&self) -> usize {
        match &self.data {
            HunkData::Literal(bytes) => bytes.len(),
            HunkData::Rle { length, .. } => *length,
        }
    }

    fn end(&self) -> i64 {
        self.offset + self.len() as i64
    }

    fn byte_at(&self, pos: i64) -> u8 {
        match &self.data {
            HunkData::Literal(bytes) => bytes[(pos - self.offset) as usize],
            HunkData::Rle { value, .. } => *value,
        }
    }

    /// The sub-range `[from, to)` of this hunk as a new hunk.
    fn slice(&self, from: i64, to: i64) -> Hunk {
        let data = match &self.data {
            HunkData::Literal(bytes) => HunkData::Literal(
                bytes[(from - self.offset) as usize..(to - self.offset) as usize].to_vec(),
            ),
            HunkData::Rle { value, .. } => HunkData::Rle {
                length: (to - from) as usize,
                value: *value,
            },
        };
        Hunk {
            offset: from,
            data,
            suppressed: self.suppressed,
        }
    }
}

#[derive(Default)]
pub struct PatchList {
    hunks: Vec<Hunk>,
}

impl PatchList {
    pub fn new() -> PatchList {
        PatchList::default()
    }

    /// Append a flushed buffer as hunks, extracting long single-byte runs
    /// into RLE hunks.
    pub fn append(&mut self, offset: i64, bytes: &[u8]) {
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            let run_byte = bytes[i];
            let mut run_end = i + 1;
            while run_end < bytes.len() && bytes[run_end] == run_byte {
                run_end += 1;
            }
            if run_end - i >= RLE_THRESHOLD {
                if start < i {
                    self.push_literal(offset + start as i64, &bytes[start..i]);
                }
                self.hunks.push(Hunk {
                    offset: offset + i as i64,
                    data: HunkData::Rle {
                        length: run_end - i,
                        value: run_byte,
                    },
                    suppressed: false,
                });
                start = run_end;
            }
            i = run_end;
        }
        if start < bytes.len() {
            self.push_literal(offset + start as i64, &bytes[start..]);
        }
    }

    fn push_literal(&mut self, offset: i64, bytes: &[u8]) {
        self.hunks.push(Hunk {
            offset,
            data: HunkData::Literal(bytes.to_vec()),
            suppressed: false,
        });
    }

    /// Mark every accumulated hunk as suppressed. They stay in the list so
    /// read-back still sees the bytes.
    pub fn suppress_all(&mut self) {
        for h in &mut self.hunks {
            h.suppressed = true;
        }
    }

    /// The byte most recently written at `pos`, if any.
    pub fn byte_at(&self, pos: i64) -> Option<u8> {
        self.hunks
            .iter()
            .rev()
            .find(|h| pos >= h.offset && pos < h.end())
            .map(|h| h.byte_at(pos))
    }

    /// Rewrite the list into a minimal, position-sorted, non-overlapping
    /// sequence. Hunks appended later take precedence over earlier ones.
    /// Runs passes over the list until one makes no change.
    pub fn simplify(&mut self) {
        loop {
            let mut changed = false;
            let mut i = 0;
            while i < self.hunks.len() {
                if self.hunks[i].suppressed || self.hunks[i].len() == 0 {
                    self.hunks.remove(i);
                    changed = true;
                    continue;
                }
                if i + 1 >= self.hunks.len() {
                    break;
                }
                let (cur_off, cur_end) = (self.hunks[i].offset, self.hunks[i].end());
                let (next_off, next_end) = (self.hunks[i + 1].offset, self.hunks[i + 1].end());
                if cur_off >= next_off && cur_end <= next_end {
                    // Fully covered by the newer hunk.
                    self.hunks.remove(i);
                    changed = true;
                } else if next_off > cur_off && next_off < cur_end && next_end >= cur_end {
                    // Newer hunk overlaps our tail.
                    self.hunks[i] = self.hunks[i].slice(cur_off, next_off);
                    changed = true;
                    i += 1;
                } else if next_off > cur_off && next_end < cur_end {
                    // Newer hunk is strictly inside: keep the flanks.
                    let left = self.hunks[i].slice(cur_off, next_off);
                    let right = self.hunks[i].slice(next_end, cur_end);
                    self.hunks[i] = left;
                    self.hunks.insert(i + 2, right);
                    changed = true;
                    i += 1;
                } else if next_off <= cur_off {
                    // Out-of-order: trim our head past the newer hunk, then
                    // swap so offsets sort.
                    if next_end > cur_off {
                        let from = next_end.min(cur_end);
                        self.hunks[i] = self.hunks[i].slice(from, cur_end);
                    }
                    self.hunks.swap(i, i + 1);
                    changed = true;
                    i += 1;
                } else if next_off == cur_end && self.literal_pair(i) {
                    // Contiguous literals collapse into one hunk.
                    let next = self.hunks.remove(i + 1);
                    if let (HunkData::Literal(cur), HunkData::Literal(more)) =
                        (&mut self.hunks[i].data, next.data)
                    {
                        cur.extend_from_slice(&more);
                    }
                    changed = true;
                } else {
                    i += 1;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn literal_pair(&self, i: usize) -> bool {
        matches!(self.hunks[i].data, HunkData::Literal(_))
            && matches!(self.hunks[i + 1].data, HunkData::Literal(_))
            && !self.hunks[i + 1].suppressed
    }

    /// Serialize as an IPS stream: `PATCH`, then per hunk a 3-byte offset
    /// and 2-byte length (0 signals RLE: 2-byte run length + value byte),
    /// closed by `EOF`. Big-endian fields, as the format demands.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PATCH");
        for h in &self.hunks {
            match &h.data {
                HunkData::Literal(bytes) => {
                    for (n, chunk) in bytes.chunks(0xFFFF).enumerate() {
                        push_offset(&mut out, h.offset + (n * 0xFFFF) as i64);
                        out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
                        out.extend_from_slice(chunk);
                    }
                }
                HunkData::Rle { length, value } => {
                    push_offset(&mut out, h.offset);
                    out.extend_from_slice(&[0, 0]);
                    out.extend_from_slice(&(*length as u16).to_be_bytes());
                    out.push(*value);
                }
            }
        }
        out.extend_from_slice(b"EOF");
        out
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }
}

fn push_offset(out: &mut Vec<u8>, offset: i64) {
    let off = offset as u32;
    out.extend_from_slice(&[(off >> 16) as u8, (off >> 8) as u8, off as u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(list: &PatchList) -> Vec<(i64, Vec<u8>)> {
        list.hunks()
            .iter()
            .map(|h| {
                let bytes = match &h.data {
                    HunkData::Literal(b) => b.clone(),
                    HunkData::Rle { length, value } => vec![*value; *length],
                };
                (h.offset, bytes)
            })
            .collect()
    }

    #[test]
    fn long_runs_become_rle() {
        let mut p = PatchList::new();
        let mut bytes = vec![1, 2, 3];
        bytes.extend(std::iter::repeat_n(0xFF, 40));
        bytes.push(9);
        p.append(0x100, &bytes);
        assert_eq!(p.hunks().len(), 3);
        assert_eq!(
            p.hunks()[1].data,
            HunkData::Rle {
                length: 40,
                value: 0xFF
            }
        );
        assert_eq!(p.hunks()[2].offset, 0x100 + 43);
    }

    #[test]
    fn later_write_inside_earlier_hunk_splits_it() {
        let mut p = PatchList::new();
        p.append(0x10, &[1, 1, 1]);
        p.append(0x20, &[2, 2, 2, 2]);
        p.append(0x11, &[9]);
        p.simplify();
        assert_eq!(
            literal(&p),
            vec![(0x10, vec![1, 9, 1]), (0x20, vec![2, 2, 2, 2])]
        );
    }

    #[test]
    fn overlap_truncates_older_hunk() {
        let mut p = PatchList::new();
        p.append(0x10, &[1, 1, 1, 1]);
        p.append(0x12, &[7, 7, 7, 7]);
        p.simplify();
        assert_eq!(literal(&p), vec![(0x10, vec![1, 1, 7, 7, 7, 7])]);
    }

    #[test]
    fn out_of_order_writes_sort_with_newer_winning() {
        let mut p = PatchList::new();
        p.append(0x20, &[1, 1]);
        p.append(0x10, &[2, 2]);
        p.simplify();
        assert_eq!(literal(&p), vec![(0x10, vec![2, 2]), (0x20, vec![1, 1])]);
    }

    #[test]
    fn full_cover_drops_older_hunk() {
        let mut p = PatchList::new();
        p.append(0x11, &[1, 1]);
        p.append(0x10, &[5, 5, 5, 5]);
        p.simplify();
        assert_eq!(literal(&p), vec![(0x10, vec![5, 5, 5, 5])]);
    }

    #[test]
    fn suppressed_hunks_still_read_back_but_never_emit() {
        let mut p = PatchList::new();
        p.append(0x10, &[1, 2, 3]);
        p.suppress_all();
        assert_eq!(p.byte_at(0x11), Some(2));
        p.simplify();
        assert!(p.hunks().is_empty());
        assert_eq!(p.serialize(), b"PATCHEOF".to_vec());
    }

    #[test]
    fn serialized_stream_shape() {
        let mut p = PatchList::new();
        p.append(0x000102, &[0xAB, 0xCD]);
        p.simplify();
        let out = p.serialize();
        assert_eq!(&out[..5], b"PATCH");
        assert_eq!(&out[5..8], &[0x00, 0x01, 0x02]);
        assert_eq!(&out[8..10], &[0x00, 0x02]);
        assert_eq!(&out[10..12], &[0xAB, 0xCD]);
        assert_eq!(&out[12..], b"EOF");
    }

    #[test]
    fn latest_byte_wins_in_read_back() {
        let mut p = PatchList::new();
        p.append(0x10, &[1, 1, 1]);
        p.append(0x11, &[9]);
        assert_eq!(p.byte_at(0x11), Some(9));
        assert_eq!(p.byte_at(0x12), Some(1));
        assert_eq!(p.byte_at(0x50), None);
    }
}
