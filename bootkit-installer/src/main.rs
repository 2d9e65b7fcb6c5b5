use std::process::ExitCode;

fn main() -> ExitCode {
    match bootkit_installer::run() {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            eprintln!("bootkit: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
