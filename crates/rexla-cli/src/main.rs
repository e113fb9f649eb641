use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rexla::{
    Computation, ComputationBuilder, DType, ExecutableBuildOptions, ExecutableRunOptions,
    ExecutionProfile, Literal, LocalClient, Shape,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    rexla_backend_host::register_host_platform();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("rexla {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "platforms" => run_platforms(),
        "sample" => run_sample(args.collect()),
        "print" => run_print(args.collect()),
        "run" => run_computation(args.collect()),
        "overhead" => run_overhead(args.collect()),
        other => Err(anyhow!("unknown command '{other}'")),
    }
}

fn print_help() {
    println!(
        "rexla\n\nUSAGE:\n  rexla platforms\n  rexla sample <OUT.json>\n  rexla print <COMPUTATION>\n  rexla run <COMPUTATION> [--platform NAME] [--device N] [--arg LITERAL.json]... [--profile] [--json]\n  rexla overhead [--platform NAME] [--iters N] [--warmup N]\n\nComputations ending in .bin are read as bincode, anything else as JSON.\nLogging is controlled by RUST_LOG."
    );
}

fn take_value(raw_args: &[String], i: usize, flag: &str) -> Result<String> {
    raw_args
        .get(i)
        .cloned()
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn parse_count(value: &str, flag: &str) -> Result<usize> {
    value
        .parse()
        .with_context(|| format!("invalid value '{value}' for {flag}"))
}

fn client_for(platform: Option<&str>) -> Result<LocalClient> {
    let name = platform.unwrap_or_else(|| rexla::env::default_platform_name());
    LocalClient::for_platform_name(name).with_context(|| format!("creating client for '{name}'"))
}

fn load_computation(path: &Path) -> Result<Computation> {
    let computation = if path.extension().is_some_and(|ext| ext == "bin") {
        Computation::load_bincode(path)
    } else {
        Computation::load_json(path)
    };
    computation.with_context(|| format!("loading computation from {}", path.display()))
}

fn run_platforms() -> Result<()> {
    for name in rexla::registry::list_platforms() {
        let client = client_for(Some(name.as_str()))?;
        let supported = (0..client.device_count())
            .filter(|&ordinal| client.device_ordinal_supported(ordinal))
            .map(|ordinal| ordinal.to_string())
            .collect::<Vec<_>>();
        println!(
            "{name}: {} device(s), supported [{}]",
            client.device_count(),
            supported.join(", ")
        );
    }
    Ok(())
}

fn run_sample(raw_args: Vec<String>) -> Result<()> {
    let [out] = raw_args.as_slice() else {
        bail!("sample expects exactly one output path");
    };
    let mut b = ComputationBuilder::new("add_vectors");
    let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
    let y = b.constant_r1(&[2.0f32, 3.0, 4.0]);
    b.add(x, y);
    let computation = b.build()?;
    computation.save_json(out)?;

    let argument = PathBuf::from(out).with_extension("arg0.json");
    std::fs::write(&argument, Literal::r1(&[0.0f32, 1.0, 2.0]).to_json_string()?)
        .with_context(|| format!("writing {}", argument.display()))?;
    println!("wrote {out} and {}", argument.display());
    Ok(())
}

fn run_print(raw_args: Vec<String>) -> Result<()> {
    let [path] = raw_args.as_slice() else {
        bail!("print expects exactly one computation path");
    };
    let computation = load_computation(Path::new(path))?;
    println!("{}", computation.program_shape());
    print!("{}", computation.to_text());
    Ok(())
}

fn run_computation(raw_args: Vec<String>) -> Result<()> {
    let mut path: Option<PathBuf> = None;
    let mut platform: Option<String> = None;
    let mut device: Option<usize> = None;
    let mut arguments: Vec<PathBuf> = Vec::new();
    let mut profile = false;
    let mut json = false;

    let mut i = 0usize;
    while i < raw_args.len() {
        match raw_args[i].as_str() {
            "--platform" => {
                i += 1;
                platform = Some(take_value(&raw_args, i, "--platform")?);
            }
            "--device" => {
                i += 1;
                device = Some(parse_count(&take_value(&raw_args, i, "--device")?, "--device")?);
            }
            "--arg" => {
                i += 1;
                arguments.push(PathBuf::from(take_value(&raw_args, i, "--arg")?));
            }
            "--profile" => profile = true,
            "--json" => json = true,
            flag if flag.starts_with("--") => bail!("unknown run flag '{flag}'"),
            positional if path.is_none() => path = Some(PathBuf::from(positional)),
            extra => bail!("unexpected argument '{extra}'"),
        }
        i += 1;
    }

    let path = path.ok_or_else(|| anyhow!("missing computation path"))?;
    let computation = load_computation(&path)?;
    let client = client_for(platform.as_deref())?;
    let device = match device {
        Some(ordinal) => ordinal,
        None => client.default_device_ordinal()?,
    };

    let literals = arguments
        .iter()
        .map(|arg| {
            let text = std::fs::read_to_string(arg)
                .with_context(|| format!("reading argument {}", arg.display()))?;
            Literal::from_json_str(&text).with_context(|| format!("parsing argument {}", arg.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let buffers = literals
        .iter()
        .map(|literal| client.literal_to_shaped_buffer(literal, device, None))
        .collect::<rexla::XlaResult<Vec<_>>>()?;
    let argument_refs = buffers.iter().map(|buffer| &**buffer).collect::<Vec<_>>();

    let execution_profile = Arc::new(ExecutionProfile::new());
    let mut run_options = ExecutableRunOptions::new().with_device_ordinal(device);
    if profile {
        run_options = run_options.with_execution_profile(execution_profile.clone());
    }
    let result = client.execute_locally(
        &computation,
        &argument_refs,
        &ExecutableBuildOptions::new().with_device_ordinal(device),
        &run_options,
    )?;
    let literal = client.shaped_buffer_to_literal(&result)?;

    if json {
        let mut report = serde_json::json!({
            "computation": computation.name(),
            "platform": client.platform_id().as_str(),
            "device": device,
            "result": serde_json::to_value(&literal)?,
        });
        if profile {
            report["profile"] = serde_json::json!({
                "compute_time_ns": execution_profile.compute_time_ns(),
                "compute_and_transfer_time_ns": execution_profile.compute_and_transfer_time_ns(),
            });
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{literal}");
        if profile {
            println!("{execution_profile}");
        }
    }
    Ok(())
}

fn run_overhead(raw_args: Vec<String>) -> Result<()> {
    let mut platform: Option<String> = None;
    let mut iters = 1000usize;
    let mut warmup = 2usize;

    let mut i = 0usize;
    while i < raw_args.len() {
        match raw_args[i].as_str() {
            "--platform" => {
                i += 1;
                platform = Some(take_value(&raw_args, i, "--platform")?);
            }
            "--iters" => {
                i += 1;
                iters = parse_count(&take_value(&raw_args, i, "--iters")?, "--iters")?;
            }
            "--warmup" => {
                i += 1;
                warmup = parse_count(&take_value(&raw_args, i, "--warmup")?, "--warmup")?;
            }
            flag => bail!("unknown overhead flag '{flag}'"),
        }
        i += 1;
    }
    if iters == 0 {
        bail!("--iters must be positive");
    }

    let client = client_for(platform.as_deref())?;
    let device = client.default_device_ordinal()?;
    let shape = Shape::array(DType::F32, [2, 3]);
    let mut b = ComputationBuilder::new("overhead");
    let x = b.parameter(0, shape.clone(), "x");
    b.add(x, x);
    let computation = b.build()?;
    let executable = client.compile(&computation, &[shape], &ExecutableBuildOptions::new())?;

    let mut rng = StdRng::from_entropy();
    let values = (0..6).map(|_| rng.gen_range(-1.0f32..1.0)).collect::<Vec<_>>();
    let argument = client.literal_to_shaped_buffer(&Literal::from_vec([2, 3], values)?, device, None)?;
    let profile = Arc::new(ExecutionProfile::new());
    let run_options = ExecutableRunOptions::new()
        .with_stream(client.new_stream(device)?)
        .with_execution_profile(profile.clone());

    for _ in 0..warmup {
        executable.run(&[&argument], &run_options)?;
    }
    profile.reset();

    let start = Instant::now();
    for _ in 0..iters {
        executable.run(&[&argument], &run_options)?;
    }
    let elapsed = start.elapsed();
    let per_run_us = elapsed.as_secs_f64() * 1e6 / iters as f64;
    tracing::info!(iters, warmup, elapsed_ms = elapsed.as_millis() as u64, "overhead run finished");
    println!(
        "platform={} iters={iters} mean={per_run_us:.2}us compute_share={:.1}%",
        client.platform_id(),
        100.0 * profile.compute_time_ns() as f64 / profile.compute_and_transfer_time_ns().max(1) as f64
    );
    Ok(())
}
