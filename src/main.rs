use anyhow::{bail, Context};
use structopt::StructOpt;

mod cli;

use fwpost::image::{Image, LoadOptions};
use fwpost::pipeline::{self, Job, Params, Summary};
use fwpost::{release, Config, IdentityPatch};

fn load_config(opts: &cli::Opts) -> Result<Config, anyhow::Error> {
    match &opts.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_options(args: &cli::LoadArgs) -> LoadOptions {
    LoadOptions {
        format: args.format,
        bin_offset: args.bin_offset,
        fill_gaps: args.fill_gaps,
    }
}

fn print_summary(summary: &Summary) {
    println!(
        "Start 0x{:x}, Length 0x{:x}, CRC32 0x{:08x}",
        summary.base_address, summary.length, summary.crc
    );

    if let Some(crc) = summary.legacy_crc {
        println!("Legacy CRC32 0x{:08x}", crc);
    }
}

fn finalize(opts: &cli::FinalizeOpts, config: &Config) -> Result<(), anyhow::Error> {
    let job = Job {
        input: opts.input.clone(),
        output: opts.output.clone(),
        load: load_options(&opts.load),
        params: Params {
            identity: IdentityPatch {
                board_id: opts.board_id,
                family_id: opts.family_id,
            },
            legacy: opts.legacy,
        },
    };

    let summary = job
        .run(config)
        .with_context(|| format!("Failed to finalize '{}'", opts.input.display()))?;

    print_summary(&summary);

    Ok(())
}

fn verify(opts: &cli::VerifyOpts) -> Result<(), anyhow::Error> {
    let image = Image::load(&opts.input, &load_options(&opts.load))
        .with_context(|| format!("Failed to load '{}'", opts.input.display()))?;
    let report = pipeline::verify(&image)?;

    println!(
        "Start 0x{:x}, Length 0x{:x}",
        image.base_address(),
        image.len()
    );
    println!(
        "Vector checksum 0x{:08x} (expected 0x{:08x}): {}",
        report.stored_checksum,
        report.expected_checksum,
        if report.checksum_ok() { "ok" } else { "BAD" }
    );
    println!(
        "CRC32 0x{:08x} (computed 0x{:08x}): {}",
        report.stored_crc,
        report.computed_crc,
        if report.crc_ok() { "ok" } else { "BAD" }
    );

    if !report.is_valid() {
        bail!("'{}' is not a valid finalized image", opts.input.display());
    }

    Ok(())
}

fn release(opts: &cli::ReleaseOpts, config: &Config) -> Result<(), anyhow::Error> {
    let results = release::run_batch(
        &opts.inputs,
        config,
        LoadOptions::default(),
        opts.legacy,
        opts.jobs,
    );
    let mut failures = 0;

    for job_result in &results {
        println!("{}", job_result.job.output.display());

        match &job_result.result {
            Ok(summary) => print_summary(summary),
            Err(err) => {
                eprintln!("Error: {}", err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} release image(s) failed", failures, results.len());
    }

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    use cli::Command;

    // Timestamped logger, verbosity is set through RUST_LOG
    pretty_env_logger::init_timed();

    // Parse the command-line arguments
    let opts = cli::Opts::from_args();
    let config = load_config(&opts)?;

    match &opts.command {
        Command::Finalize(finalize_opts) => finalize(finalize_opts, &config)?,
        Command::Verify(verify_opts) => verify(verify_opts)?,
        Command::Release(release_opts) => release(release_opts, &config)?,
    }

    Ok(())
}
