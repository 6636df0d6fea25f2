//! acquireQ CLI
//!
//! Binary name: `acquireq`

use std::process;

use acquireq::cli::{
    build_cli,
    handlers::{format_error, run_cli},
};

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let cli_result = tokio::select! {
        result = run_cli(&matches) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    };

    if let Err(err) = cli_result {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {}", format_error(&err));
        }

        let code = err
            .downcast_ref::<acquireq_core::Error>()
            .map_or(1, acquireq_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}
