//! CLI for computing additively weighted Voronoi vertices of balls.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use apollota::bounding_spheres_hierarchy::check_initial_radius;
use apollota::collisions::find_all_collisions;
use apollota::geometry::distance;
use apollota::input::read_balls;
use apollota::output::{
    collect_vertices_vector, construct_vertices_graph, read_quadruples, write_vertices,
    write_vertices_json, write_vertices_with_graph,
};
use apollota::{
    Ball, BoundingSpheresHierarchy, Error, ParallelConfig, ParallelMethod, Quadruple,
    QuadruplesMap, Result, calculate_directional_difference_between_two_sets_of_quadruples,
    calculate_vertices_in_parallel, check_quadruples_map, construct_result, spheres_from_balls,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};

#[derive(Parser)]
#[command(name = "apollota")]
#[command(about = "Compute additively weighted Voronoi vertices of balls")]
#[command(
    long_about = "Finds every quadruple of balls that has a tangent sphere overlapping \
    no input ball. Balls are read from stdin as 'x y z r' lines."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Reduce verbosity to warnings only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Calculate vertices for the whole input at once
    CalculateVertices {
        #[command(flatten)]
        common: VerticesArgs,

        /// Exclude balls contained inside other balls
        #[arg(long)]
        exclude_hidden_balls: bool,

        /// Verify the result against all balls by brute force
        #[arg(long)]
        check: bool,
    },
    /// Split the input into parts and calculate vertices for each part
    CalculateVerticesInParallel {
        #[command(flatten)]
        common: VerticesArgs,

        /// Processing backend
        #[arg(long, value_enum)]
        method: ParallelMethod,

        /// Number of parts, a power of 2
        #[arg(long)]
        parts: usize,

        /// Threads for the openmp method (default: all available)
        #[arg(long)]
        threads: Option<usize>,

        /// Ranks for the mpi method, coordinator included
        #[arg(long, default_value_t = 4)]
        ranks: usize,
    },
    /// Count quadruples of the first file missing from the second
    CompareQuadruples {
        /// Vertices file whose quadruples are checked
        #[arg(long)]
        first: PathBuf,

        /// Vertices file checked against
        #[arg(long)]
        second: PathBuf,

        /// Initial radius of the bounding spheres hierarchy
        #[arg(long, default_value_t = 3.5)]
        init_radius_for_bsh: f64,

        /// Comment marker of the balls input
        #[arg(long, default_value = "#")]
        comment_marker: String,
    },
    /// Print all pairs of overlapping balls
    QueryBallsClashes {
        /// Initial radius of the bounding spheres hierarchy
        #[arg(long, default_value_t = 3.5)]
        init_radius_for_bsh: f64,

        /// Comment marker of the balls input
        #[arg(long, default_value = "#")]
        comment_marker: String,
    },
}

#[derive(Args)]
struct VerticesArgs {
    /// Initial radius of the bounding spheres hierarchy
    #[arg(long, default_value_t = 3.5)]
    init_radius_for_bsh: f64,

    /// Register degenerate tangent spheres under every 4-subset of touching balls
    #[arg(long)]
    include_surplus_quadruples: bool,

    /// Append neighbour vertex indices to every vertex
    #[arg(long)]
    link: bool,

    /// Print diagnostics to stderr
    #[arg(long)]
    print_log: bool,

    /// Comment marker of the balls input
    #[arg(long, default_value = "#")]
    comment_marker: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::CalculateVertices {
            common,
            exclude_hidden_balls,
            check,
        } => {
            check_initial_radius(common.init_radius_for_bsh)?;
            let balls = read_stdin_balls(&common.comment_marker)?;

            let start = Instant::now();
            let result = construct_result(
                &balls,
                common.init_radius_for_bsh,
                exclude_hidden_balls,
                common.include_surplus_quadruples,
            )?;
            info!(
                "Found {} quadruples in {} ms",
                result.quadruples_map.len(),
                start.elapsed().as_millis()
            );

            if check {
                report_check(&balls, &result.quadruples_map);
            }
            write_map(&result.quadruples_map, &common)?;
            if common.print_log {
                result.print_status(&mut io::stderr().lock())?;
            }
            Ok(())
        }
        Command::CalculateVerticesInParallel {
            common,
            method,
            parts,
            threads,
            ranks,
        } => {
            let config = ParallelConfig {
                method,
                parts,
                init_radius: common.init_radius_for_bsh,
                include_surplus_quadruples: common.include_surplus_quadruples,
                threads,
                ranks,
            };
            config.validate()?;
            let balls = read_stdin_balls(&common.comment_marker)?;

            let start = Instant::now();
            let result = calculate_vertices_in_parallel(&balls, &config)?;
            info!(
                "Parallel processing took {} ms",
                start.elapsed().as_millis()
            );

            write_map(&result.merged_quadruples_map, &common)?;
            if common.print_log {
                result.print_log(&mut io::stderr().lock())?;
            }
            Ok(())
        }
        Command::CompareQuadruples {
            first,
            second,
            init_radius_for_bsh,
            comment_marker,
        } => {
            check_initial_radius(init_radius_for_bsh)?;
            let first_set = read_quadruples_file(&first)?;
            let second_set = read_quadruples_file(&second)?;
            let balls = read_stdin_balls(&comment_marker)?;

            let result = calculate_directional_difference_between_two_sets_of_quadruples(
                &balls,
                init_radius_for_bsh,
                &first_set,
                &second_set,
            )?;
            let mut out = io::stdout().lock();
            writeln!(out, "all_differences {}", result.all_differences.len())?;
            writeln!(
                out,
                "confirmed_differences {}",
                result.confirmed_differences.len()
            )?;
            Ok(())
        }
        Command::QueryBallsClashes {
            init_radius_for_bsh,
            comment_marker,
        } => {
            check_initial_radius(init_radius_for_bsh)?;
            let balls = read_stdin_balls(&comment_marker)?;
            let bsh =
                BoundingSpheresHierarchy::new(spheres_from_balls(&balls), init_radius_for_bsh, 1)?;
            let spheres = bsh.leaves_spheres();

            let mut out = BufWriter::new(io::stdout().lock());
            let mut clashes = 0usize;
            for (i, a) in spheres.iter().enumerate() {
                for j in find_all_collisions(&bsh, a).into_iter().filter(|&j| j > i) {
                    writeln!(out, "{i} {j} {:.15}", distance(&a.center, &spheres[j].center))?;
                    clashes += 1;
                }
            }
            out.flush()?;
            info!("Found {clashes} clashes");
            Ok(())
        }
    }
}

fn read_stdin_balls(comment_marker: &str) -> Result<Vec<Ball>> {
    let balls = read_balls(io::stdin().lock(), comment_marker)?;
    info!("Read {} balls", balls.len());
    Ok(balls)
}

fn read_quadruples_file(path: &Path) -> Result<BTreeSet<Quadruple>> {
    let quadruples = read_quadruples(BufReader::new(File::open(path)?))?;
    if quadruples.is_empty() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no quadruples in '{}'", path.display()),
        )));
    }
    debug!("Read {} quadruples from {}", quadruples.len(), path.display());
    Ok(quadruples)
}

fn report_check(balls: &[Ball], map: &QuadruplesMap) {
    let passed = check_quadruples_map(&spheres_from_balls(balls), map);
    if passed {
        info!("Check passed for {} quadruples", map.len());
    } else {
        warn!("Check failed");
    }
    eprintln!("check_result {}", if passed { "passed" } else { "failed" });
}

fn write_map(map: &QuadruplesMap, args: &VerticesArgs) -> io::Result<()> {
    let vertices = collect_vertices_vector(map);
    let graph = args.link.then(|| construct_vertices_graph(&vertices));

    let mut out = BufWriter::new(io::stdout().lock());
    match (args.output_format, &graph) {
        (OutputFormat::Text, Some(graph)) => write_vertices_with_graph(&mut out, &vertices, graph)?,
        (OutputFormat::Text, None) => write_vertices(&mut out, &vertices)?,
        (OutputFormat::Json, graph) => write_vertices_json(&mut out, &vertices, graph.as_deref())?,
    }
    out.flush()
}
