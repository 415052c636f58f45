//! `gcc-ocf` binary entry point: parses the CLI and exits with the error
//! taxonomy's stable exit code (see `gcc_ocf::error::GccError::exit_code`).

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let code = gcc_ocf::cli::run();
    std::process::exit(code);
}
