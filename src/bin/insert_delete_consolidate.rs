//! Streaming build driver: batch build, checkpointed inserts, lazy deletes
//! with consolidation, staged snapshots.

use std::env;
use std::error::Error as _;
use std::path::PathBuf;
use std::process;

use starling::driver::{build_incremental_index, DriverOptions};
use starling::{IndexError, Metric, Result};

fn main() {
    if env::args().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return;
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match CliConfig::parse(args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}\n");
            print_usage();
            process::exit(-1);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("Error: {err}");
        let mut source = err.source();
        while let Some(inner) = source {
            eprintln!("  caused by: {inner}");
            source = inner.source();
        }
        process::exit(-1);
    }
}

fn run(config: CliConfig) -> Result<()> {
    let summary = match config.data_type.as_str() {
        "int8" => build_incremental_index::<i8>(&config.opts)?,
        "uint8" => build_incremental_index::<u8>(&config.opts)?,
        "float" => build_incremental_index::<f32>(&config.opts)?,
        other => {
            return Err(IndexError::InvalidConfig(format!(
                "unsupported data type {other}; use float/int8/uint8"
            )))
        }
    };

    let report = serde_json::to_string_pretty(&summary)
        .map_err(|e| IndexError::Io(e.to_string()))?;
    println!("{report}");
    Ok(())
}

struct CliConfig {
    data_type: String,
    opts: DriverOptions,
}

impl CliConfig {
    fn parse(args: Vec<String>) -> std::result::Result<CliConfig, String> {
        let mut data_type: Option<String> = None;
        let mut dist_fn: Option<String> = None;
        let mut data_path: Option<PathBuf> = None;
        let mut index_path_prefix: Option<String> = None;
        let mut max_degree = 64usize;
        let mut build_beam = 100usize;
        let mut alpha = 1.2f32;
        let mut num_threads = 0usize;
        let mut points_to_skip: Option<usize> = None;
        let mut max_points_to_insert = 0usize;
        let mut beginning_index_size: Option<usize> = None;
        let mut points_per_checkpoint: Option<usize> = None;
        let mut checkpoints_per_snapshot: Option<usize> = None;
        let mut points_to_delete_from_beginning: Option<usize> = None;
        let mut start_deletes_after = 0usize;
        let mut do_concurrent = false;
        let mut start_point_norm = 0.0f32;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            let mut value = |name: &str| -> std::result::Result<String, String> {
                iter.next().ok_or_else(|| format!("{name} requires a value"))
            };
            match arg.as_str() {
                "--data_type" => data_type = Some(value("--data_type")?),
                "--dist_fn" => dist_fn = Some(value("--dist_fn")?),
                "--data_path" => data_path = Some(PathBuf::from(value("--data_path")?)),
                "--index_path_prefix" => index_path_prefix = Some(value("--index_path_prefix")?),
                "--max_degree" | "-R" => max_degree = parse_num(&value("--max_degree")?)?,
                "--Lbuild" | "-L" => build_beam = parse_num(&value("--Lbuild")?)?,
                "--alpha" => alpha = parse_float(&value("--alpha")?)?,
                "--num_threads" | "-T" => num_threads = parse_num(&value("--num_threads")?)?,
                "--points_to_skip" => points_to_skip = Some(parse_num(&value("--points_to_skip")?)?),
                "--max_points_to_insert" => {
                    max_points_to_insert = parse_num(&value("--max_points_to_insert")?)?
                }
                "--beginning_index_size" => {
                    beginning_index_size = Some(parse_num(&value("--beginning_index_size")?)?)
                }
                "--points_per_checkpoint" => {
                    points_per_checkpoint = Some(parse_num(&value("--points_per_checkpoint")?)?)
                }
                "--checkpoints_per_snapshot" => {
                    checkpoints_per_snapshot =
                        Some(parse_num(&value("--checkpoints_per_snapshot")?)?)
                }
                "--points_to_delete_from_beginning" => {
                    points_to_delete_from_beginning =
                        Some(parse_num(&value("--points_to_delete_from_beginning")?)?)
                }
                "--start_deletes_after" => {
                    start_deletes_after = parse_num(&value("--start_deletes_after")?)?
                }
                "--do_concurrent" => do_concurrent = parse_bool(&value("--do_concurrent")?)?,
                "--start_point_norm" => start_point_norm = parse_float(&value("--start_point_norm")?)?,
                other => return Err(format!("unknown option {other}")),
            }
        }

        let data_type = data_type.ok_or("--data_type is required")?;
        let dist_fn = dist_fn.ok_or("--dist_fn is required")?;
        let dist_fn = Metric::parse(&dist_fn)
            .ok_or_else(|| format!("unknown distance function {dist_fn}; use l2/mips"))?;
        let beginning_index_size = beginning_index_size.ok_or("--beginning_index_size is required")?;

        if beginning_index_size == 0 && start_point_norm == 0.0 {
            return Err(
                "when beginning_index_size is 0, use a start point with an appropriate norm"
                    .to_string(),
            );
        }

        Ok(CliConfig {
            data_type,
            opts: DriverOptions {
                dist_fn,
                data_path: data_path.ok_or("--data_path is required")?,
                index_path_prefix: index_path_prefix.ok_or("--index_path_prefix is required")?,
                max_degree,
                build_beam,
                alpha,
                num_threads,
                points_to_skip: points_to_skip.ok_or("--points_to_skip is required")?,
                max_points_to_insert,
                beginning_index_size,
                points_per_checkpoint: points_per_checkpoint
                    .ok_or("--points_per_checkpoint is required")?,
                checkpoints_per_snapshot: checkpoints_per_snapshot
                    .ok_or("--checkpoints_per_snapshot is required")?,
                points_to_delete_from_beginning: points_to_delete_from_beginning
                    .ok_or("--points_to_delete_from_beginning is required")?,
                start_deletes_after,
                do_concurrent,
                start_point_norm,
            },
        })
    }
}

fn parse_num(value: &str) -> std::result::Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| format!("expected a non-negative integer, got {value:?}"))
}

fn parse_float(value: &str) -> std::result::Result<f32, String> {
    value
        .parse::<f32>()
        .map_err(|_| format!("expected a number, got {value:?}"))
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("expected true/false, got {value:?}")),
    }
}

fn print_usage() {
    println!("insert_delete_consolidate: streaming index build with deletes\n");
    println!("Required:");
    println!("  --data_type <int8|uint8|float>      scalar kind of the data file");
    println!("  --dist_fn <l2|mips>                 distance function");
    println!("  --data_path <file>                  input vectors in bin format");
    println!("  --index_path_prefix <prefix>        snapshot filename prefix");
    println!("  --points_to_skip <n>                ignore the first n points of the file");
    println!("  --beginning_index_size <n>          size of the initial batch build");
    println!("  --points_per_checkpoint <n>         insert batch size");
    println!("  --checkpoints_per_snapshot <n>      0 disables periodic snapshots");
    println!("  --points_to_delete_from_beginning <n>");
    println!("\nOptional:");
    println!("  --max_degree, -R <n>                out-degree bound (default 64)");
    println!("  --Lbuild, -L <n>                    build beam width (default 100)");
    println!("  --alpha <f>                         prune diversity, >= 1.0 (default 1.2)");
    println!("  --num_threads, -T <n>               default: one per core");
    println!("  --max_points_to_insert <n>          0 = rest of the file (default 0)");
    println!("  --start_deletes_after <n>           insert count that triggers deletion");
    println!("  --do_concurrent <true|false>        overlap deletion with inserts");
    println!("  --start_point_norm <f>              norm of the random entry point");
}
