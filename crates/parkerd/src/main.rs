use std::process::ExitCode;

fn main() -> ExitCode {
    parkerd::capture_local_offset();
    match parkerd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("parkerd: {error}");
            ExitCode::FAILURE
        }
    }
}
