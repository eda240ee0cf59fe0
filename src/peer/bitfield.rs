use bytes::Bytes;
use rand::Rng as _;

/// The set of complete pieces held by one peer.
///
/// Bits are stored least-significant-bit first within each byte: piece `i`
/// lives at bit `i % 8` of byte `i / 8`. The wire format numbers bits from
/// the high bit of each byte instead, so [`to_wire`](Self::to_wire) and
/// [`from_wire`](Self::from_wire) reverse the bit order of every byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceSet {
    bits: Vec<u8>,
    piece_count: usize,
}

impl PieceSet {
    /// Creates an empty set for the given number of pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a set with every piece complete.
    pub fn full(piece_count: usize) -> Self {
        let mut set = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        set.clear_spare_bits();
        set
    }

    /// Decodes a wire bitfield.
    ///
    /// Short input is zero-padded, long input is truncated, and bits past
    /// `piece_count` are ignored.
    pub fn from_wire(bytes: &[u8], piece_count: usize) -> Self {
        let byte_count = piece_count.div_ceil(8);
        let mut bits: Vec<u8> = bytes
            .iter()
            .take(byte_count)
            .map(|b| b.reverse_bits())
            .collect();
        bits.resize(byte_count, 0);

        let mut set = Self { bits, piece_count };
        set.clear_spare_bits();
        set
    }

    /// Encodes the set as a wire bitfield of `ceil(piece_count / 8)` bytes.
    pub fn to_wire(&self) -> Bytes {
        self.bits.iter().map(|b| b.reverse_bits()).collect()
    }

    /// Replaces the whole set with a received wire bitfield.
    pub fn replace_from_wire(&mut self, bytes: &[u8]) {
        *self = Self::from_wire(bytes, self.piece_count);
    }

    /// Returns true if the piece at `index` is complete.
    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Marks a piece complete. Idempotent; out-of-range indices are ignored.
    pub fn mark_complete(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] |= 1 << (index % 8);
    }

    /// Returns the number of complete pieces.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if every piece is complete.
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Returns true if `other` has at least one piece this set lacks.
    pub fn is_interested_in(&self, other: &PieceSet) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(ours, theirs)| theirs & !ours != 0)
    }

    /// Returns the indices `other` has and this set lacks, in ascending order.
    pub fn interesting_pieces(&self, other: &PieceSet) -> Vec<usize> {
        let limit = self.piece_count.min(other.piece_count);
        (0..limit)
            .filter(|&i| other.has_piece(i) && !self.has_piece(i))
            .collect()
    }

    /// Picks a piece to request from `other`, uniformly at random among the
    /// pieces it has and this set lacks.
    ///
    /// Random choice keeps sessions that request from the same neighbor from
    /// all converging on the same piece.
    pub fn next_interesting_piece(&self, other: &PieceSet) -> Option<usize> {
        pick_random(&self.interesting_pieces(other))
    }

    /// Fraction of complete pieces as a whole percentage.
    pub fn progress_percent(&self) -> u32 {
        if self.piece_count == 0 {
            return 0;
        }
        (self.count() * 100 / self.piece_count) as u32
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 && spare < 8 {
            let mask = 0xFFu8 >> spare;
            let last = self.bits.len() - 1;
            self.bits[last] &= mask;
        }
    }
}

pub(crate) fn pick_random(candidates: &[usize]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..candidates.len());
    Some(candidates[idx])
}
