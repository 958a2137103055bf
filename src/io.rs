//! Binary vector file decoding and encoding.
//!
//! The on-disk format is two little-endian `i32` headers (`npts`, `dim`)
//! followed by `npts * dim` scalars, row-major, with no per-row padding.
//! Loads go through [`load_aligned_part`], which reads a contiguous range
//! of points and lays each row out at the index's padded stride so the
//! buffer can be handed to the store verbatim.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::store;

/// Header of a binary vector file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinMetadata {
    pub npts: usize,
    pub dim: usize,
}

impl BinMetadata {
    /// Row stride, in scalars, after padding to the store's alignment.
    pub fn aligned_dim(&self) -> usize {
        store::aligned_dim(self.dim)
    }
}

fn read_header(reader: &mut impl Read) -> Result<(i32, i32)> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    let npts = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let dim = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok((npts, dim))
}

/// Reads and validates the header of the vector file at `path`.
///
/// The file length must be exactly `8 + npts * dim * width` bytes;
/// anything else is a [`IndexError::FileSizeMismatch`].
pub fn bin_metadata<T: Element>(path: &Path) -> Result<BinMetadata> {
    let file = File::open(path)?;
    let actual = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (npts, dim) = read_header(&mut reader)?;
    if npts < 0 || dim <= 0 {
        return Err(IndexError::Io(format!(
            "malformed header in {}: npts = {npts}, dim = {dim}",
            path.display()
        )));
    }
    let npts = npts as usize;
    let dim = dim as usize;

    let expected = 8 + (npts * dim * T::WIDTH) as u64;
    if actual != expected {
        return Err(IndexError::FileSizeMismatch {
            actual,
            expected,
            npts,
            dim,
        });
    }
    Ok(BinMetadata { npts, dim })
}

/// Loads `points_to_read` points starting at `offset_points`, padding each
/// row out to the aligned stride with zeros.
///
/// Returns a buffer of `points_to_read * aligned_dim` scalars.
pub fn load_aligned_part<T: Element>(
    path: &Path,
    offset_points: usize,
    points_to_read: usize,
) -> Result<Vec<T>> {
    let meta = bin_metadata::<T>(path)?;
    if offset_points + points_to_read > meta.npts {
        return Err(IndexError::InvalidConfig(format!(
            "not enough points in {}: requested offset {offset_points} + {points_to_read} \
             points, file has {}",
            path.display(),
            meta.npts
        )));
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(
        8 + (offset_points * meta.dim * T::WIDTH) as u64,
    ))?;

    let aligned = meta.aligned_dim();
    let mut data = vec![T::default(); points_to_read * aligned];
    let mut row = vec![0u8; meta.dim * T::WIDTH];
    for point in 0..points_to_read {
        reader.read_exact(&mut row)?;
        let out = &mut data[point * aligned..point * aligned + meta.dim];
        for (i, scalar) in out.iter_mut().enumerate() {
            *scalar = T::read_le(&row[i * T::WIDTH..]);
        }
    }
    Ok(data)
}

/// Writes `npts` rows of `dim` scalars in the binary vector format, taking
/// each row as the first `dim` scalars of a `stride`-sized chunk of `data`.
pub fn write_bin<T: Element>(
    path: &Path,
    data: &[T],
    npts: usize,
    dim: usize,
    stride: usize,
) -> Result<()> {
    debug_assert!(stride >= dim);
    debug_assert!(data.len() >= npts * stride);
    let mut writer = BufWriter::new(File::create(path)?);
    write_bin_header(&mut writer, npts, dim)?;
    for point in 0..npts {
        write_bin_row(&mut writer, &data[point * stride..point * stride + dim])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the two-`i32` header of a binary vector file.
pub fn write_bin_header(writer: &mut impl Write, npts: usize, dim: usize) -> Result<()> {
    writer.write_all(&(npts as i32).to_le_bytes())?;
    writer.write_all(&(dim as i32).to_le_bytes())?;
    Ok(())
}

/// Writes one unpadded row.
pub fn write_bin_row<T: Element>(writer: &mut impl Write, row: &[T]) -> Result<()> {
    let mut bytes = Vec::with_capacity(row.len() * T::WIDTH);
    for &scalar in row {
        scalar.write_le(&mut bytes);
    }
    writer.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, npts: usize, dim: usize, data: &[f32]) -> std::path::PathBuf {
        let path = dir.join(name);
        write_bin(&path, data, npts, dim, dim).unwrap();
        path
    }

    #[test]
    fn metadata_round_trips() {
        let dir = tempdir().unwrap();
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let path = write_file(dir.path(), "a.bin", 4, 3, &data);

        let meta = bin_metadata::<f32>(&path).unwrap();
        assert_eq!(meta, BinMetadata { npts: 4, dim: 3 });
        assert_eq!(meta.aligned_dim(), 8);
    }

    #[test]
    fn truncated_file_is_a_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            // Header claims 1000 points but only 999 rows follow.
            write_bin_header(&mut writer, 1000, 2).unwrap();
            for _ in 0..999 {
                write_bin_row(&mut writer, &[0.0f32, 0.0]).unwrap();
            }
            writer.flush().unwrap();
        }

        match bin_metadata::<f32>(&path) {
            Err(IndexError::FileSizeMismatch { npts, dim, .. }) => {
                assert_eq!(npts, 1000);
                assert_eq!(dim, 2);
            }
            other => panic!("expected FileSizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn partial_load_pads_rows_to_stride() {
        let dir = tempdir().unwrap();
        let data: Vec<f32> = (0..30).map(|i| i as f32).collect();
        let path = write_file(dir.path(), "b.bin", 10, 3, &data);

        let part = load_aligned_part::<f32>(&path, 4, 2).unwrap();
        assert_eq!(part.len(), 2 * 8);
        assert_eq!(&part[0..3], &[12.0, 13.0, 14.0]);
        assert_eq!(&part[3..8], &[0.0; 5]);
        assert_eq!(&part[8..11], &[15.0, 16.0, 17.0]);
    }

    #[test]
    fn load_past_the_end_is_rejected() {
        let dir = tempdir().unwrap();
        let data: Vec<f32> = vec![0.0; 6];
        let path = write_file(dir.path(), "c.bin", 3, 2, &data);

        assert!(matches!(
            load_aligned_part::<f32>(&path, 2, 2),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn integer_scalars_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("i8.bin");
        let data: Vec<i8> = vec![-3, 0, 3, 7, -7, 1];
        write_bin(&path, &data, 3, 2, 2).unwrap();

        let meta = bin_metadata::<i8>(&path).unwrap();
        assert_eq!(meta.npts, 3);
        let part = load_aligned_part::<i8>(&path, 1, 2).unwrap();
        assert_eq!(&part[0..2], &[3, 7]);
        assert_eq!(&part[8..10], &[-7, 1]);
    }
}
