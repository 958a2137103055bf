//! The checkpointed streaming driver.
//!
//! Drives a [`StreamingIndex`] from a binary vector file: an optional
//! initial batch build, then checkpointed parallel inserts, an optional
//! delete window (lazy deletes plus one consolidation), and staged
//! snapshots. In concurrent mode the thread budget is split in half: one
//! rayon pool drives the insert checkpoints while the deletion runs to
//! completion on a background thread with its own pool, joined before the
//! final snapshot.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::distance::{Element, Metric};
use crate::error::{IndexError, Result};
use crate::index::{IndexParams, StreamingIndex};
use crate::io;

/// Everything the driver needs for one run. Field names follow the
/// command-line options one to one.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub dist_fn: Metric,
    pub data_path: PathBuf,
    pub index_path_prefix: String,
    /// Per-slot out-degree bound (R).
    pub max_degree: usize,
    /// Build-time beam width (L).
    pub build_beam: usize,
    pub alpha: f32,
    /// 0 means one thread per core.
    pub num_threads: usize,
    pub points_to_skip: usize,
    /// 0 means the rest of the file.
    pub max_points_to_insert: usize,
    pub beginning_index_size: usize,
    pub points_per_checkpoint: usize,
    /// 0 disables periodic snapshots.
    pub checkpoints_per_snapshot: usize,
    pub points_to_delete_from_beginning: usize,
    pub start_deletes_after: usize,
    pub do_concurrent: bool,
    pub start_point_norm: f32,
}

/// Final state of a driver run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub active_points: usize,
    pub max_points: usize,
    pub empty_slots: usize,
    pub final_snapshot: String,
}

/// Snapshot path: `<prefix><stage>skip<S>-del<D>-<threshold>`.
fn save_filename(
    prefix: &str,
    stage: &str,
    points_to_skip: usize,
    points_deleted: usize,
    last_point_threshold: usize,
) -> String {
    format!("{prefix}{stage}skip{points_to_skip}-del{points_deleted}-{last_point_threshold}")
}

fn make_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| IndexError::InvalidConfig(format!("thread pool: {e}")))
}

fn load_part<T: Element>(path: &std::path::Path, offset: usize, count: usize) -> Result<Vec<T>> {
    let timer = Instant::now();
    let data = io::load_aligned_part::<T>(path, offset, count)?;
    println!(
        "Read {count} points in {:.3}s",
        timer.elapsed().as_secs_f64()
    );
    Ok(data)
}

/// Inserts rows `[start, end)` of the file (already loaded into `data`)
/// under tags `row + 1`, one parallel task per point.
fn insert_checkpoint<T: Element>(
    index: &StreamingIndex<T>,
    start: usize,
    end: usize,
    pool: &rayon::ThreadPool,
    data: &[T],
) -> Result<()> {
    let aligned = crate::store::aligned_dim(index.dim());
    let dim = index.dim();
    let timer = Instant::now();
    pool.install(|| {
        (start..end).into_par_iter().try_for_each(|row| {
            let offset = (row - start) * aligned;
            index.insert_point(&data[offset..offset + dim], (row + 1) as u32)
        })
    })?;
    let elapsed = timer.elapsed().as_secs_f64();
    let inserted = (end - start) as f64;
    println!(
        "Insertion time {:.3}s ({:.1} points/second overall, {:.1} per thread)",
        elapsed,
        inserted / elapsed,
        inserted / elapsed / pool.current_num_threads() as f64
    );
    Ok(())
}

/// Lazily deletes the window `[points_to_skip, points_to_skip + count)`
/// (by tag convention, row + 1) and runs one consolidation pass.
fn delete_from_beginning<T: Element>(
    index: &StreamingIndex<T>,
    pool: &rayon::ThreadPool,
    points_to_skip: usize,
    count: usize,
) -> Result<()> {
    println!(
        "\nLazy deleting points {points_to_skip} to {}...",
        points_to_skip + count
    );
    for row in points_to_skip..points_to_skip + count {
        index.lazy_delete((row + 1) as u32)?;
    }
    println!("done.");

    let report = pool.install(|| index.consolidate_deletes())?;
    println!("#active points: {}", report.active_points);
    println!("max points: {}", report.max_points);
    println!("empty slots: {}", report.empty_slots);
    println!("deletes processed: {}", report.slots_released);
    println!("latest delete size: {}", report.delete_set_size);
    println!(
        "rate: ({:.1} points/second overall, {:.1} per thread)",
        count as f64 / report.time,
        count as f64 / report.time / pool.current_num_threads() as f64
    );
    Ok(())
}

fn timed_save<T: Element>(
    index: &StreamingIndex<T>,
    path: &str,
    points_saved: usize,
) -> Result<()> {
    let timer = Instant::now();
    index.save(path)?;
    let elapsed = timer.elapsed().as_secs_f64();
    println!(
        "Saved {points_saved} points to {path} in {elapsed:.3}s ({:.1} points/second)",
        points_saved as f64 / elapsed
    );
    Ok(())
}

/// Runs one full streaming build according to `opts`.
pub fn build_incremental_index<T: Element>(opts: &DriverOptions) -> Result<RunSummary> {
    let meta = io::bin_metadata::<T>(&opts.data_path)?;

    if opts.points_to_skip > meta.npts {
        return Err(IndexError::InvalidConfig(format!(
            "asked to skip {} points but the data file has only {}",
            opts.points_to_skip, meta.npts
        )));
    }

    let mut max_points_to_insert = opts.max_points_to_insert;
    if max_points_to_insert == 0 {
        max_points_to_insert = meta.npts;
    }
    if opts.points_to_skip + max_points_to_insert > meta.npts {
        max_points_to_insert = meta.npts - opts.points_to_skip;
        eprintln!(
            "WARNING: reducing max_points_to_insert to {max_points_to_insert} \
             points since the data file has only that many"
        );
    }
    if max_points_to_insert == 0 {
        return Err(IndexError::InvalidConfig("no points to insert".into()));
    }

    let mut beginning_index_size = opts.beginning_index_size;
    if beginning_index_size > max_points_to_insert {
        beginning_index_size = max_points_to_insert;
        eprintln!(
            "WARNING: reducing beginning index size to {beginning_index_size} \
             points since the data file has only that many"
        );
    }
    if opts.checkpoints_per_snapshot > 0 && beginning_index_size > opts.points_per_checkpoint {
        beginning_index_size = opts.points_per_checkpoint;
        eprintln!("WARNING: reducing beginning index size to {beginning_index_size}");
    }
    if beginning_index_size == 0 && !(opts.start_point_norm > 0.0) {
        return Err(IndexError::InvalidConfig(
            "when beginning_index_size is 0, use a start point with an appropriate norm".into(),
        ));
    }
    if opts.points_per_checkpoint == 0 && beginning_index_size < max_points_to_insert {
        return Err(IndexError::InvalidConfig(
            "points_per_checkpoint must be positive".into(),
        ));
    }

    let mut points_to_delete = opts.points_to_delete_from_beginning;
    if points_to_delete > max_points_to_insert {
        points_to_delete = max_points_to_insert;
        eprintln!(
            "WARNING: reducing points to delete from beginning to {points_to_delete} \
             points since the data file has only that many"
        );
    }

    let num_threads = if opts.num_threads == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        opts.num_threads
    };

    let params = IndexParams {
        max_degree: opts.max_degree,
        beam_width: opts.build_beam,
        alpha: opts.alpha,
        ..IndexParams::default()
    };
    let index = StreamingIndex::<T>::new(opts.dist_fn, meta.dim, max_points_to_insert, params)?;

    let last_point_threshold = opts.points_to_skip + max_points_to_insert;
    let full_pool = make_pool(num_threads)?;

    let timer = Instant::now();
    if beginning_index_size > 0 {
        let data = load_part::<T>(&opts.data_path, opts.points_to_skip, beginning_index_size)?;
        let tags: Vec<u32> = (0..beginning_index_size)
            .map(|i| (opts.points_to_skip + i + 1) as u32)
            .collect();
        full_pool.install(|| index.build(&data, beginning_index_size, &tags))?;
        println!(
            "Initial non-incremental index build for {beginning_index_size} points took \
             {:.3}s ({:.1} points/second)",
            timer.elapsed().as_secs_f64(),
            beginning_index_size as f64 / timer.elapsed().as_secs_f64()
        );
    } else {
        index.set_start_point_at_random(opts.start_point_norm)?;
    }

    let insert_start = opts.points_to_skip + beginning_index_size;
    let final_path = if opts.do_concurrent {
        run_concurrent(
            &index,
            opts,
            insert_start,
            last_point_threshold,
            points_to_delete,
            num_threads,
        )?
    } else {
        run_sequential(
            &index,
            opts,
            insert_start,
            last_point_threshold,
            points_to_delete,
            &full_pool,
        )?
    };

    let stats = index.stats();
    Ok(RunSummary {
        active_points: stats.active_points,
        max_points: stats.max_points,
        empty_slots: stats.empty_slots,
        final_snapshot: final_path,
    })
}

fn run_sequential<T: Element>(
    index: &StreamingIndex<T>,
    opts: &DriverOptions,
    insert_start: usize,
    last_point_threshold: usize,
    points_to_delete: usize,
    pool: &rayon::ThreadPool,
) -> Result<String> {
    let mut last_snapshot_threshold = 0usize;
    let mut checkpoints_until_snapshot = opts.checkpoints_per_snapshot;

    let mut start = insert_start;
    while start < last_point_threshold {
        let end = (start + opts.points_per_checkpoint).min(last_point_threshold);
        println!("\nInserting from {start} to {end}");
        let data = load_part::<T>(&opts.data_path, start, end - start)?;
        insert_checkpoint(index, start, end, pool, &data)?;

        if opts.checkpoints_per_snapshot > 0 {
            checkpoints_until_snapshot -= 1;
            if checkpoints_until_snapshot == 0 {
                let path = save_filename(
                    &opts.index_path_prefix,
                    ".inc-",
                    opts.points_to_skip,
                    points_to_delete,
                    end,
                );
                timed_save(index, &path, end - opts.points_to_skip)?;
                checkpoints_until_snapshot = opts.checkpoints_per_snapshot;
                last_snapshot_threshold = end;
            }
        }
        println!("Number of points in the index post insertion {end}");
        start = end;
    }

    if opts.checkpoints_per_snapshot > 0 && last_snapshot_threshold != last_point_threshold {
        let path = save_filename(
            &opts.index_path_prefix,
            ".inc-",
            opts.points_to_skip,
            points_to_delete,
            last_point_threshold,
        );
        timed_save(index, &path, last_point_threshold - opts.points_to_skip)?;
    }

    if points_to_delete > 0 {
        delete_from_beginning(index, pool, opts.points_to_skip, points_to_delete)?;
    }

    let final_path = save_filename(
        &opts.index_path_prefix,
        ".after-delete-",
        opts.points_to_skip,
        points_to_delete,
        last_point_threshold,
    );
    timed_save(index, &final_path, last_point_threshold - opts.points_to_skip)?;
    Ok(final_path)
}

fn run_concurrent<T: Element>(
    index: &StreamingIndex<T>,
    opts: &DriverOptions,
    insert_start: usize,
    last_point_threshold: usize,
    points_to_delete: usize,
    num_threads: usize,
) -> Result<String> {
    let sub_threads = num_threads.div_ceil(2);
    let insert_pool = make_pool(sub_threads)?;
    let timer = Instant::now();

    thread::scope(|scope| -> Result<()> {
        let mut delete_task: Option<thread::ScopedJoinHandle<'_, Result<()>>> = None;

        let mut start = insert_start;
        while start < last_point_threshold {
            let end = (start + opts.points_per_checkpoint).min(last_point_threshold);
            println!("\nInserting from {start} to {end}");
            let data = load_part::<T>(&opts.data_path, start, end - start)?;
            insert_checkpoint(index, start, end, &insert_pool, &data)?;

            // Launch the deletion exactly once, as soon as the whole delete
            // window is present and the configured threshold is crossed.
            if delete_task.is_none()
                && points_to_delete > 0
                && end >= opts.start_deletes_after
                && end >= opts.points_to_skip + points_to_delete
            {
                let skip = opts.points_to_skip;
                delete_task = Some(scope.spawn(move || {
                    let pool = make_pool(sub_threads)?;
                    delete_from_beginning(index, &pool, skip, points_to_delete)
                }));
            }
            start = end;
        }

        match delete_task {
            Some(task) => task
                .join()
                .map_err(|_| IndexError::Io("deletion task panicked".into()))?,
            // Threshold never crossed during the insert loop: run it now so
            // the delete window is honored regardless.
            None if points_to_delete > 0 => {
                delete_from_beginning(index, &insert_pool, opts.points_to_skip, points_to_delete)
            }
            None => Ok(()),
        }
    })?;

    println!("Time Elapsed {}ms", timer.elapsed().as_millis());
    let final_path = save_filename(
        &opts.index_path_prefix,
        ".after-concurrent-delete-",
        opts.points_to_skip,
        points_to_delete,
        last_point_threshold,
    );
    timed_save(index, &final_path, last_point_threshold - opts.points_to_skip)?;
    Ok(final_path)
}
