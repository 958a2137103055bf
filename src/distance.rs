//! Distance scoring over slot vectors.
//!
//! The index stores one scalar element type per instance (`i8`, `u8` or
//! `f32`) and scores pairs of slots with a single metric chosen at
//! construction. Distances always accumulate in `f32` regardless of the
//! element type.
//!
//! ## Important nuance
//!
//! [`Metric::Mips`] is the *negated* inner product, so that "smaller is
//! closer" holds for every metric and the traversal and pruning code never
//! branches on the metric kind.

/// Scalar element kinds the index can store and score.
///
/// Implemented for `i8`, `u8` and `f32`, matching the element kinds of the
/// binary vector file format.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Element width in bytes, as laid out in data files.
    const WIDTH: usize;

    /// Decodes one element from little-endian bytes.
    ///
    /// `bytes` must hold at least [`Element::WIDTH`] bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Appends the little-endian encoding of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Widens to `f32` for distance accumulation.
    fn to_f32(self) -> f32;

    /// Narrowing conversion used when materializing synthetic points
    /// (e.g. a random entry point of a requested norm).
    fn from_f32(value: f32) -> Self;
}

impl Element for f32 {
    const WIDTH: usize = 4;

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Element for i8 {
    const WIDTH: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value as i8
    }
}

impl Element for u8 {
    const WIDTH: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value as u8
    }
}

/// Distance metric for slot vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean (L2) distance.
    L2,
    /// Maximum inner product search, scored as the negated inner product.
    Mips,
}

impl Metric {
    /// Parses the metric names accepted by the driver (`l2`, `mips`).
    pub fn parse(name: &str) -> Option<Metric> {
        match name {
            "l2" => Some(Metric::L2),
            "mips" => Some(Metric::Mips),
            _ => None,
        }
    }

    /// Scores a pair of equal-length vectors. Smaller is closer.
    pub fn score<T: Element>(self, a: &[T], b: &[T]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| {
                    let d = x.to_f32() - y.to_f32();
                    d * d
                })
                .sum(),
            Metric::Mips => -a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| x.to_f32() * y.to_f32())
                .sum::<f32>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_is_squared_euclidean() {
        let a = [0.0f32, 0.0, 0.0];
        let b = [1.0f32, 2.0, 2.0];
        assert_eq!(Metric::L2.score(&a, &b), 9.0);
    }

    #[test]
    fn mips_is_negated_inner_product() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        assert_eq!(Metric::Mips.score(&a, &b), -11.0);
    }

    #[test]
    fn integer_elements_widen_before_scoring() {
        let a = [0i8, -4];
        let b = [3i8, 0];
        assert_eq!(Metric::L2.score(&a, &b), 25.0);

        let a = [200u8, 0];
        let b = [0u8, 100];
        assert_eq!(Metric::L2.score(&a, &b), 50_000.0);
    }

    #[test]
    fn parse_accepts_driver_names() {
        assert_eq!(Metric::parse("l2"), Some(Metric::L2));
        assert_eq!(Metric::parse("mips"), Some(Metric::Mips));
        assert_eq!(Metric::parse("cosine"), None);
    }

    #[test]
    fn element_round_trips_through_bytes() {
        let mut buf = Vec::new();
        1.5f32.write_le(&mut buf);
        (-7i8).write_le(&mut buf);
        250u8.write_le(&mut buf);
        assert_eq!(f32::read_le(&buf[0..4]), 1.5);
        assert_eq!(i8::read_le(&buf[4..5]), -7);
        assert_eq!(u8::read_le(&buf[5..6]), 250);
    }
}
