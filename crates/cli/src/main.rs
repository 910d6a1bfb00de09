use std::process::ExitCode;

fn main() -> ExitCode {
    hakatabot_cli::run()
}
