//! Snapshot save and load.
//!
//! A snapshot is three artifacts under one path prefix:
//!
//! - `<prefix>`: the graph. A fixed-width header (`u64` file size,
//!   `u32` max observed degree, `u32` entry slot, `u64` frozen count)
//!   followed by one length-prefixed `u32` neighbor row per slot.
//! - `<prefix>.tags`: the tag of every saved slot (`0` = untagged) in the
//!   binary vector format, one `u32` per row.
//! - `<prefix>.data`: the stored vectors in the binary vector format.
//!
//! Rows cover the allocated slot range and then the frozen slots, so the
//! frozen entries compact down to sit right after the user range; slot IDs
//! inside neighbor rows are remapped accordingly on save and mapped back
//! on load. Saving is only defined on a quiescent, fully consolidated
//! index, and `save(load(p)) == p` byte for byte.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use crate::distance::{Element, Metric};
use crate::error::{IndexError, Result};
use crate::graph::NeighborVec;
use crate::io;
use crate::tags::NULL_TAG;

use super::{IndexParams, StreamingIndex};

fn graph_path(prefix: &str) -> PathBuf {
    PathBuf::from(prefix)
}

fn tags_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}.tags"))
}

fn data_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}.data"))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

impl<T: Element> StreamingIndex<T> {
    /// Writes the graph, tag and vector artifacts under `prefix`.
    ///
    /// The index must have an entry point and no pending deletes; run a
    /// consolidation first. Returns the total bytes written.
    pub fn save(&self, prefix: &str) -> Result<u64> {
        let _pass = self.consolidate_lock();
        let map = self.tags_guard();
        let _excl = self.structural_write();

        if !self.deleted_read().is_empty() {
            return Err(IndexError::InvalidConfig(
                "consolidate pending deletes before saving".into(),
            ));
        }
        let n = map.allocated_range() as usize;
        let num_frozen = self.params().num_frozen;
        if self.frozen_slots().is_empty() || !self.search_ready() {
            return Err(IndexError::InvalidConfig(
                "cannot save an index with no entry point".into(),
            ));
        }

        let row_slot = |row: usize| -> u32 {
            if row < n {
                row as u32
            } else {
                (self.max_points() + (row - n)) as u32
            }
        };
        // Frozen slots compact down to rows [n, n + num_frozen).
        let remap = |id: u32| -> u32 {
            if id as usize >= self.max_points() {
                (n + (id as usize - self.max_points())) as u32
            } else {
                id
            }
        };
        let total_rows = n + num_frozen;

        // Graph.
        let rows: Vec<NeighborVec> = (0..total_rows)
            .map(|row| {
                let mut list = self.adjacency().read(row_slot(row));
                for id in list.iter_mut() {
                    *id = remap(*id);
                }
                list
            })
            .collect();
        let max_observed = rows.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        let graph_bytes: u64 =
            24 + rows.iter().map(|r| 4 * (1 + r.len()) as u64).sum::<u64>();

        let mut writer = BufWriter::new(File::create(graph_path(prefix))?);
        writer.write_all(&graph_bytes.to_le_bytes())?;
        writer.write_all(&max_observed.to_le_bytes())?;
        writer.write_all(&remap(self.frozen_slots()[0]).to_le_bytes())?;
        writer.write_all(&(num_frozen as u64).to_le_bytes())?;
        for row in &rows {
            writer.write_all(&(row.len() as u32).to_le_bytes())?;
            for &id in row.iter() {
                writer.write_all(&id.to_le_bytes())?;
            }
        }
        writer.flush()?;

        // Tags.
        let mut writer = BufWriter::new(File::create(tags_path(prefix))?);
        io::write_bin_header(&mut writer, total_rows, 1)?;
        for row in 0..total_rows {
            let tag = if row < n {
                map.tag_of(row_slot(row)).unwrap_or(NULL_TAG)
            } else {
                NULL_TAG
            };
            writer.write_all(&tag.to_le_bytes())?;
        }
        writer.flush()?;

        // Vectors.
        let dim = self.dim();
        let mut writer = BufWriter::new(File::create(data_path(prefix))?);
        io::write_bin_header(&mut writer, total_rows, dim)?;
        for row in 0..total_rows {
            io::write_bin_row(&mut writer, &self.store().vector(row_slot(row))[..dim])?;
        }
        writer.flush()?;

        let tags_bytes = 8 + 4 * total_rows as u64;
        let data_bytes = 8 + (total_rows * dim * T::WIDTH) as u64;
        Ok(graph_bytes + tags_bytes + data_bytes)
    }

    /// Loads a snapshot saved under `prefix` into a fresh index with the
    /// given capacity and parameters.
    pub fn load(
        metric: Metric,
        max_points: usize,
        params: IndexParams,
        prefix: &str,
    ) -> Result<Self> {
        let data_file = data_path(prefix);
        let meta = io::bin_metadata::<T>(&data_file)?;
        if meta.npts < params.num_frozen {
            return Err(IndexError::InvalidConfig(format!(
                "snapshot has {} rows, fewer than {} frozen points",
                meta.npts, params.num_frozen
            )));
        }
        let n = meta.npts - params.num_frozen;
        if n > max_points {
            return Err(IndexError::InvalidConfig(format!(
                "snapshot has {n} points but the index is sized for {max_points}"
            )));
        }
        let num_frozen = params.num_frozen;
        let index = Self::new(metric, meta.dim, max_points, params)?;

        let row_slot = |row: usize| -> u32 {
            if row < n {
                row as u32
            } else {
                (max_points + (row - n)) as u32
            }
        };

        // Vectors.
        let aligned = meta.aligned_dim();
        let data = io::load_aligned_part::<T>(&data_file, 0, meta.npts)?;
        for row in 0..meta.npts {
            let src = &data[row * aligned..row * aligned + meta.dim];
            // SAFETY: the index is private to this function; no reader yet.
            unsafe { index.store().write_slot(row_slot(row), src) };
        }

        // Graph.
        let path = graph_path(prefix);
        let actual = File::open(&path)?.metadata()?.len();
        let mut reader = BufReader::new(File::open(&path)?);
        let expected = read_u64(&mut reader)?;
        if expected != actual {
            return Err(IndexError::Io(format!(
                "graph file {} is {actual} bytes, header says {expected}",
                path.display()
            )));
        }
        let _max_observed = read_u32(&mut reader)?;
        let start = read_u32(&mut reader)?;
        if start as usize != n {
            return Err(IndexError::Io(format!(
                "graph file {} has entry row {start}, expected {n}",
                path.display()
            )));
        }
        let frozen = read_u64(&mut reader)? as usize;
        if frozen != num_frozen {
            return Err(IndexError::InvalidConfig(format!(
                "snapshot carries {frozen} frozen points, index expects {num_frozen}"
            )));
        }
        for row in 0..meta.npts {
            let len = read_u32(&mut reader)? as usize;
            let mut list = NeighborVec::with_capacity(len);
            for _ in 0..len {
                let id = read_u32(&mut reader)?;
                let id = if (id as usize) < n {
                    id
                } else {
                    (max_points + (id as usize - n)) as u32
                };
                list.push(id);
            }
            index.adjacency().write(row_slot(row), list);
        }

        // Tags.
        let path = tags_path(prefix);
        let actual = File::open(&path)?.metadata()?.len();
        let expected = 8 + 4 * meta.npts as u64;
        if actual != expected {
            return Err(IndexError::FileSizeMismatch {
                actual,
                expected,
                npts: meta.npts,
                dim: 1,
            });
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let header_npts = read_u32(&mut reader)? as usize;
        let header_dim = read_u32(&mut reader)?;
        if header_npts != meta.npts || header_dim != 1 {
            return Err(IndexError::Io(format!(
                "tag file {} disagrees with data file ({header_npts} x {header_dim})",
                path.display()
            )));
        }
        {
            let mut map = index.tags_guard();
            for slot in 0..n {
                let allocated = map.allocate()?;
                debug_assert_eq!(allocated as usize, slot);
            }
            for slot in 0..n as u32 {
                let tag = read_u32(&mut reader)?;
                if tag == NULL_TAG {
                    map.release(slot);
                } else {
                    map.bind(tag, slot)?;
                }
            }
        }

        index.mark_entry_ready();
        Ok(index)
    }

    fn search_ready(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.entry_ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexParams;
    use tempfile::tempdir;

    fn small_params() -> IndexParams {
        IndexParams {
            max_degree: 4,
            beam_width: 8,
            alpha: 1.2,
            candidate_cap: 12,
            num_frozen: 1,
        }
    }

    fn ring_index(n: usize) -> StreamingIndex<f32> {
        let index = StreamingIndex::new(Metric::L2, 2, n + 4, small_params()).unwrap();
        let mut data = vec![0.0f32; n * 8];
        let mut tags = Vec::new();
        for i in 0..n {
            let angle = i as f32 / n as f32 * std::f32::consts::TAU;
            data[i * 8] = angle.cos();
            data[i * 8 + 1] = angle.sin();
            tags.push(i as u32 + 1);
        }
        index.build(&data, n, &tags).unwrap();
        index
    }

    fn read_file(path: &std::path::Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[test]
    fn save_load_preserves_points_and_results() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("ring").to_string_lossy().into_owned();

        let index = ring_index(12);
        let before = index.search(&[1.0, 0.1], 3, 8).unwrap();
        index.save(&prefix).unwrap();

        let loaded =
            StreamingIndex::<f32>::load(Metric::L2, 16, small_params(), &prefix).unwrap();
        loaded.validate().unwrap();
        let after = loaded.search(&[1.0, 0.1], 3, 8).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a").to_string_lossy().into_owned();
        let second = dir.path().join("b").to_string_lossy().into_owned();

        let index = ring_index(10);
        // Free a slot so the snapshot covers the recycled-slot shape too.
        index.lazy_delete(3).unwrap();
        index.consolidate_deletes().unwrap();
        index.save(&first).unwrap();

        let loaded =
            StreamingIndex::<f32>::load(Metric::L2, 14, small_params(), &first).unwrap();
        loaded.save(&second).unwrap();

        for ext in ["", ".tags", ".data"] {
            let a = read_file(&PathBuf::from(format!("{first}{ext}")));
            let b = read_file(&PathBuf::from(format!("{second}{ext}")));
            assert_eq!(a, b, "artifact {ext:?} differs after a load round-trip");
        }
    }

    #[test]
    fn loaded_index_accepts_further_inserts() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("grow").to_string_lossy().into_owned();

        let index = ring_index(8);
        index.save(&prefix).unwrap();

        let loaded =
            StreamingIndex::<f32>::load(Metric::L2, 12, small_params(), &prefix).unwrap();
        loaded.insert_point(&[0.0, 0.0], 50).unwrap();
        let hits = loaded.search(&[0.0, 0.0], 1, 8).unwrap();
        assert_eq!(hits[0].0, 50);
        loaded.validate().unwrap();
    }

    #[test]
    fn save_with_pending_deletes_is_rejected() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("dirty").to_string_lossy().into_owned();

        let index = ring_index(6);
        index.lazy_delete(2).unwrap();
        assert!(matches!(
            index.save(&prefix),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_rejects_oversized_snapshot() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("big").to_string_lossy().into_owned();

        let index = ring_index(10);
        index.save(&prefix).unwrap();

        assert!(matches!(
            StreamingIndex::<f32>::load(Metric::L2, 5, small_params(), &prefix),
            Err(IndexError::InvalidConfig(_))
        ));
    }
}
