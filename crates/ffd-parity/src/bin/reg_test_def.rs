use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ffd_accel::{fail_fast, AccelConfig, AccelError, ComputeCapability, ComputeDevice};
use ffd_parity::{run_parity, HarnessConfig, ParityError, ParityKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "wgpu")]
type Backend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
type Backend = burn_ndarray::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(name = "reg_test_def")]
#[command(about = "Compare the reference and accelerated free-form deformation paths")]
struct Cli {
    /// Images dimension (2 or 3)
    #[arg(value_parser = clap::value_parser!(u8).range(2..=3))]
    dim: u8,

    /// Test type
    #[arg(value_enum)]
    kind: ParityKind,

    /// Voxels along every axis of the synthetic field
    #[arg(long, default_value_t = 128)]
    size: usize,

    /// Control-point spacing in voxels
    #[arg(long, default_value_t = 5.0)]
    spacing: f64,

    /// Seed of the random control-point displacements
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Tuning table overriding the embedded group sizes
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Compute capability of the device profile, e.g. "1.3"
    #[arg(long)]
    capability: Option<ComputeCapability>,
}

/// Parse the command line; on failure the exit status to return, 0 for help and version.
fn parse_args<I, T>(args: I) -> Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| {
        let status = if err.use_stderr() { 1 } else { 0 };
        match err.print() {
            Ok(()) => status,
            Err(io) => {
                error!(%io, "could not print usage");
                1
            }
        }
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(status) => return ExitCode::from(status),
    };
    let dim = usize::from(cli.dim);

    let mut config = fail_fast(AccelConfig::embedded().map_err(AccelError::from));
    if let Some(capability) = cli.capability {
        config = config.with_capability(capability);
    }
    if let Some(path) = &cli.tuning {
        config = fail_fast(config.with_tuning_file(path).map_err(AccelError::from));
    }
    let device = fail_fast(ComputeDevice::<Backend>::select(Default::default(), &config).map_err(AccelError::from));

    let harness = HarnessConfig {
        size: cli.size,
        spacing: cli.spacing,
        seed: cli.seed,
        ..HarnessConfig::default()
    };
    let report = match run_parity(&device, dim, cli.kind, &harness) {
        Ok(report) => report,
        Err(ParityError::Accel(err)) => fail_fast(Err(err)),
        Err(err) => {
            error!(%err, "parity comparison failed");
            eprintln!("[ffd error] {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Some((host, device)) = report.values {
        println!("{} | dim [{}] : {} {}", cli.kind, dim, host, device);
    }
    match report.failure() {
        Some(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
        None => {
            info!(dim, kind = %cli.kind, difference = report.difference, "within tolerance");
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_dimension_and_kind() {
        let cli = parse_args(["reg_test_def", "3", "jacg", "--size", "16"]).unwrap();
        assert_eq!(cli.dim, 3);
        assert_eq!(cli.kind, ParityKind::Jacg);
        assert_eq!(cli.size, 16);
    }

    #[test]
    fn test_bad_arguments_exit_with_failure() {
        assert_eq!(parse_args(["reg_test_def", "4", "def"]).unwrap_err(), 1);
        assert_eq!(parse_args(["reg_test_def", "2", "bend"]).unwrap_err(), 1);
        assert_eq!(parse_args(["reg_test_def", "2"]).unwrap_err(), 1);
    }

    #[test]
    fn test_help_exits_with_success() {
        assert_eq!(parse_args(["reg_test_def", "--help"]).unwrap_err(), 0);
    }
}
