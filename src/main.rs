//! `opswap` command-line tool: lowers a JSON-described model onto the
//! reference CPU backend, fully or one operator kind at a time.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use opswap::asg::DType;
use opswap::config::SwapConfig;
use opswap::nn::{named_modules, Module, ModuleView};
use opswap::runtime::CpuBackend;
use opswap::serialization::ModuleSpec;
use opswap::swap::{patch_one_kind_in_place, swap_backend, AlgorithmPolicy, OperatorKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(author, version, about = "opswap: lower module trees onto execution backends", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lower the whole model and print the backend pipeline
    Lower {
        /// Model description (JSON)
        #[arg(short, long)]
        model: PathBuf,
        /// Swap configuration (JSON); every kind runs "default" when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Run a random input of this shape and compare with the host, e.g. 1,3,8,8
        #[arg(long, value_delimiter = ',')]
        input_shape: Option<Vec<usize>>,
        /// Seed for weights and the random input
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Swap every module of one kind for a backend wrapper
    Patch {
        #[arg(short, long)]
        model: PathBuf,
        /// Operator kind to swap, e.g. conv2d
        #[arg(short, long)]
        kind: OperatorKind,
        #[arg(short, long, default_value = "default")]
        algorithm: String,
        #[arg(long, default_value = "f32", value_parser = parse_dtype)]
        dtype: DType,
        #[arg(long, value_delimiter = ',')]
        input_shape: Option<Vec<usize>>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn parse_dtype(s: &str) -> Result<DType, String> {
    match s {
        "f32" => Ok(DType::F32),
        "f64" => Ok(DType::F64),
        other => Err(format!("unsupported dtype '{}', expected f32 or f64", other)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Lower {
            model,
            config,
            input_shape,
            seed,
        } => run_lower(model, config, input_shape, seed),
        Command::Patch {
            model,
            kind,
            algorithm,
            dtype,
            input_shape,
            seed,
        } => run_patch(model, kind, &algorithm, dtype, input_shape, seed),
    }
}

fn run_lower(
    model_path: PathBuf,
    config_path: Option<PathBuf>,
    input_shape: Option<Vec<usize>>,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let model = ModuleSpec::load(&model_path)?.build(seed)?;
    let config = match config_path {
        Some(path) => SwapConfig::load(path)?,
        None => SwapConfig::default(),
    };
    info!("lowering {} to {}", model_path.display(), config.dtype);

    let pipeline = swap_backend(model.as_ref(), config.dtype, &config.policies())?;
    for (i, layer) in pipeline.layers().iter().enumerate() {
        println!("{:>3}  {}", i, layer);
    }

    if let Some(shape) = input_shape {
        let x = sample_input(&shape, seed);
        let expected = model.eval(&x)?;
        let actual = pipeline.predict_host(&CpuBackend, &x)?;
        println!("output shape {:?}, max deviation from host {:e}", actual.shape(), max_deviation(&expected, &actual)?);
    }
    Ok(())
}

fn run_patch(
    model_path: PathBuf,
    kind: OperatorKind,
    algorithm: &str,
    dtype: DType,
    input_shape: Option<Vec<usize>>,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let mut model = ModuleSpec::load(&model_path)?.build(seed)?;
    let reference = match &input_shape {
        Some(shape) => {
            let x = sample_input(shape, seed);
            let y = model.eval(&x)?;
            Some((x, y))
        }
        None => None,
    };

    let policy = AlgorithmPolicy::constant(algorithm);
    let count = patch_one_kind_in_place(&mut model, kind, dtype, &policy, Rc::new(CpuBackend))?;
    println!("swapped {} {} module(s)", count, kind);
    for (path, module) in named_modules(model.as_ref()) {
        if let ModuleView::Lowered(layer) = module.view() {
            println!("  {}  {}", path, layer);
        }
    }

    if let Some((x, expected)) = reference {
        let actual = model.eval(&x)?;
        println!("max deviation from host {:e}", max_deviation(&expected, &actual)?);
    }
    Ok(())
}

fn sample_input(shape: &[usize], seed: u64) -> ArrayD<f32> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    ArrayD::random_using(IxDyn(shape), Uniform::new(-1.0f32, 1.0), &mut rng)
}

fn max_deviation(expected: &ArrayD<f32>, actual: &ArrayD<f32>) -> Result<f32, Box<dyn Error>> {
    if expected.shape() != actual.shape() {
        return Err(format!("output shapes differ: {:?} vs {:?}", expected.shape(), actual.shape()).into());
    }
    Ok(expected
        .iter()
        .zip(actual.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max))
}
