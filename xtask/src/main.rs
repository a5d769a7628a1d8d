use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{exit, Command};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_BIN: &str = "fanout_runtime";
const LAMBDA_DIST_DIR: &str = "infra/aws_fanout/dist";

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Local runs, CI checks and Lambda packaging for the fan-out workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one fan-out in-process against the configured url template
    Run {
        #[arg(long, default_value_t = 100)]
        amount: usize,
        /// controlled, highly-recursive or wide
        #[arg(long, default_value = "controlled")]
        preset: String,
        /// Targets admitted per window; 0 disables admission control
        #[arg(long)]
        rate_limit: Option<usize>,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the runtime binary in release mode and zip it as `bootstrap`
    ServerlessPackage {
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    Lint,
    Test,
    Check,
}

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn run_cargo(args: &[&str]) {
    eprintln!("+ cargo {}", args.join(" "));
    match Command::new("cargo").args(args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => exit(status.code().unwrap_or(1)),
        Err(error) => {
            eprintln!("error: failed to execute cargo: {error}");
            exit(1);
        }
    }
}

fn package_lambda(target: &str) {
    step("Build fanout runtime binary");
    run_cargo(&[
        "build", "-p", "fanout_lambda", "--bin", LAMBDA_BIN, "--target", target, "--release",
    ]);

    step("Package lambda zip artifact");
    let binary: PathBuf = ["target", target, "release", LAMBDA_BIN].iter().collect();
    let zip_path = Path::new(LAMBDA_DIST_DIR).join("fanout.zip");
    if let Err(error) = write_bootstrap_zip(&binary, &zip_path) {
        eprintln!("error: packaging {} failed: {error}", binary.display());
        exit(1);
    }
    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
}

/// Lambda's custom runtime expects the executable at the archive root under
/// the name `bootstrap`.
fn write_bootstrap_zip(binary: &Path, zip_path: &Path) -> io::Result<()> {
    let bytes = fs::read(binary)?;
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(fs::File::create(zip_path)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)?;
    zip.write_all(&bytes)?;
    zip.finish()?;
    Ok(())
}

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&["clippy", "--all-targets", "--all-features", "--", "-D", "warnings"]);
}

fn ci_test() {
    for package in ["fanout_core", "fanout_lambda"] {
        step(&format!("Test {package}"));
        run_cargo(&["test", "-p", package]);
    }
}

fn main() {
    match Cli::parse().command {
        Commands::Run {
            amount,
            preset,
            rate_limit,
        } => {
            let amount = amount.to_string();
            let rate_limit = rate_limit.map(|value| value.to_string());
            let mut args = vec![
                "run", "-p", "fanout_lambda", "--bin", "fanout_local", "--release", "--",
                "--amount", &amount, "--preset", &preset,
            ];
            if let Some(value) = rate_limit.as_deref() {
                args.extend(["--rate-limit", value]);
            }
            run_cargo(&args);
        }
        Commands::Ci { job } => {
            if matches!(job, CiJob::Lint | CiJob::Check) {
                ci_lint();
            }
            if matches!(job, CiJob::Test | CiJob::Check) {
                ci_test();
            }
            eprintln!("\nCI job passed.");
        }
        Commands::ServerlessPackage { target } => package_lambda(&target),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("xtask-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("scratch dir should be created");
        dir
    }

    #[test]
    fn bootstrap_zip_holds_the_executable_at_the_root() {
        let dir = scratch_dir("bootstrap");
        let binary = dir.join(LAMBDA_BIN);
        fs::write(&binary, b"\x7fELF fake").expect("binary should be written");
        let zip_path = dir.join("dist").join("fanout.zip");

        write_bootstrap_zip(&binary, &zip_path).expect("zip should be written");

        let mut archive =
            ZipArchive::new(fs::File::open(&zip_path).expect("zip should open")).expect("zip should parse");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_name("bootstrap").expect("bootstrap entry");
        assert_eq!(entry.unix_mode().map(|mode| mode & 0o777), Some(0o755));
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).expect("entry should read");
        assert_eq!(contents, b"\x7fELF fake");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_binary_is_reported() {
        let dir = scratch_dir("missing");
        let error = write_bootstrap_zip(&dir.join("absent"), &dir.join("fanout.zip"))
            .expect_err("packaging should fail");
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
        assert!(!dir.join("fanout.zip").exists());

        fs::remove_dir_all(dir).ok();
    }
}
