//! Binary entry point for the amiferry CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use amiferry::{
    AwsCliGateway, AwsError, CopyError, CopyOrchestrator, CopyRequest, FerryConfig,
    ProcessCommandRunner,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("could not read {path}: {message}")]
    Io { path: String, message: String },
    #[error(transparent)]
    Copy(#[from] CopyError<AwsError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "amiferry=info",
        1 => "amiferry=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config =
        FerryConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let request = build_request(&cli)?;
    let polls = config.poll_settings();

    let source = AwsCliGateway::new(
        config.aws_bin.clone(),
        request.source_region.clone(),
        config.source_credentials(),
        ProcessCommandRunner,
    );
    let destination = AwsCliGateway::new(
        config.aws_bin.clone(),
        request.destination_region.clone(),
        config.destination_credentials(),
        ProcessCommandRunner,
    );

    let outcome = CopyOrchestrator::new(source, destination, request, polls)
        .execute()
        .await?;

    for failure in &outcome.drain.failures {
        writeln!(
            io::stderr(),
            "warning: cleanup failed: {}: {}",
            failure.description,
            failure.message
        )
        .ok();
    }
    writeln!(io::stdout(), "AMI copy complete: {}", outcome.image_id).ok();
    Ok(())
}

fn build_request(cli: &Cli) -> Result<CopyRequest, CliError> {
    let mut request = CopyRequest::new(
        cli.image_id.clone(),
        cli.source_region.clone(),
        cli.destination_region.clone(),
    );
    if let Some(name) = &cli.name {
        request.name = name.clone();
    }
    if let Some(instance_type) = &cli.instance_type {
        request.instance_type = instance_type.clone();
    }
    if let Some(bits) = cli.key_size {
        request.key_size_bits = bits;
    }
    request.kernel_id = cli.kernel_id.clone();
    request.destination_transfer_image = cli.destination_transfer_image.clone();
    request.windows_template_image = cli.windows_template_image.clone();
    request.source_keypair = cli.source_keypair.clone();
    request.destination_keypair = cli.destination_keypair.clone();
    request.server_tool = Utf8PathBuf::from(&cli.server_tool);
    request.client_tool = Utf8PathBuf::from(&cli.client_tool);
    request.source_boot_template = read_template(&cli.server_boot)?;
    request.destination_boot_template = read_template(&cli.client_boot)?;
    Ok(request)
}

fn read_template(path: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|err| CliError::Io {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    fn minimal_args() -> Vec<&'static str> {
        vec![
            "amiferry",
            "ami-12345678",
            "us-east-1",
            "eu-west-1",
            "--server-tool",
            "/tools/server",
            "--client-tool",
            "/tools/client",
            "--server-boot",
            "/dev/null",
            "--client-boot",
            "/dev/null",
        ]
    }

    #[test]
    fn positional_arguments_parse_in_order() {
        let cli = parsed(&minimal_args());
        assert_eq!(cli.image_id, "ami-12345678");
        assert_eq!(cli.source_region, "us-east-1");
        assert_eq!(cli.destination_region, "eu-west-1");
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn overrides_land_on_the_request() {
        let mut args = minimal_args();
        args.extend([
            "--name",
            "nightly",
            "--instance-type",
            "m1.xlarge",
            "--key-size",
            "1024",
            "--kernel-id",
            "aki-forced",
        ]);
        let cli = parsed(&args);
        let request = build_request(&cli).expect("request should build");
        assert_eq!(request.name, "nightly");
        assert_eq!(request.instance_type, "m1.xlarge");
        assert_eq!(request.key_size_bits, 1024);
        assert_eq!(request.kernel_id.as_deref(), Some("aki-forced"));
    }

    #[test]
    fn boot_templates_are_read_from_disk() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let template = dir.path().join("server.tpl");
        std::fs::write(&template, "fetch @server_url@ with @secret@").expect("write template");

        let mut args: Vec<String> = minimal_args().iter().map(|arg| (*arg).to_owned()).collect();
        args[9] = template.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(&args).expect("arguments should parse");
        let request = build_request(&cli).expect("request should build");
        assert_eq!(request.source_boot_template, "fetch @server_url@ with @secret@");
    }

    #[test]
    fn a_missing_template_file_is_reported_with_its_path() {
        let mut args = minimal_args();
        args[9] = "/definitely/not/here";
        let cli = parsed(&args);
        let err = build_request(&cli).expect_err("missing file should fail");
        assert!(matches!(err, CliError::Io { ref path, .. } if path == "/definitely/not/here"));
    }

    #[test]
    fn write_error_renders_the_message() {
        let mut buf = Vec::new();
        write_error(
            &mut buf,
            &CliError::Config(String::from("missing secret key")),
        );
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("configuration error: missing secret key"));
    }
}
