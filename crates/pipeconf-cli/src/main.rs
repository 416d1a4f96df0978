use std::process::ExitCode;

fn main() -> ExitCode {
    pipeconf_cli::run()
}
