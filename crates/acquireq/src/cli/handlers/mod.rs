use std::path::PathBuf;

use acquireq_core::{config::load_config, ClaimantId, Config, ResourceId};
use anyhow::Result;
use clap::ArgMatches;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::commands::{self, serve::serve, App, Line, Outcome, Request};

/// Resolve configuration, start logging, open the engine and run the
/// selected subcommand
///
/// # Errors
///
/// Returns an error if configuration, the database or the operation fails
pub async fn run_cli(matches: &ArgMatches) -> Result<()> {
    let config = apply_flags(load_config()?, matches);
    config.validate()?;
    init_tracing(&config.log_filter);

    let (app, report) = App::open(config).await?;
    tracing::debug!(
        rearmed = report.rearmed,
        expired = report.expired,
        "engine ready"
    );

    match matches.subcommand() {
        Some(("serve", _)) => {
            tracing::info!("serving JSON-lines requests on stdin");
            serve(&app, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
            Ok(())
        }
        Some(("recover", _)) => {
            print_line(&Line::Ok(Outcome::Recovered(report)));
            Ok(())
        }
        Some((name, sub_m)) => {
            let request = request_from(name, sub_m)?;
            let outcome = commands::execute(&app, request).await?;
            print_line(&Line::Ok(outcome));
            Ok(())
        }
        None => anyhow::bail!("Unknown command. Run 'acquireq --help' for usage."),
    }
}

/// CLI flags take precedence over every config layer
fn apply_flags(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(db) = matches.get_one::<String>("db") {
        config.database_path = PathBuf::from(db);
    }
    if let Some(filter) = matches.get_one::<String>("log") {
        config.log_filter.clone_from(filter);
    }
    config
}

/// `RUST_LOG` wins over the configured filter
fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn request_from(name: &str, matches: &ArgMatches) -> Result<Request> {
    let request = match name {
        "create" => Request::Create {
            name: required(matches, "name")?,
            description: matches.get_one::<String>("description").cloned(),
            offer_duration_secs: matches.get_one::<u32>("offer-duration").copied(),
        },
        "join" => Request::Join {
            resource_id: resource(matches)?,
            label: required(matches, "label")?,
            contact: matches.get_one::<String>("contact").cloned(),
            claimant_id: matches.get_one::<i64>("id").copied().map(ClaimantId::new),
        },
        "release" => Request::Release {
            resource_id: resource(matches)?,
            claimant_id: claimant(matches)?,
        },
        "accept" => Request::Accept {
            resource_id: resource(matches)?,
            claimant_id: claimant(matches)?,
        },
        "reject" => Request::Reject {
            resource_id: resource(matches)?,
            claimant_id: claimant(matches)?,
        },
        "leave" => Request::Leave {
            resource_id: resource(matches)?,
            claimant_id: claimant(matches)?,
        },
        "status" => Request::Status {
            resource_id: resource(matches)?,
        },
        "sweep" => Request::Sweep,
        other => anyhow::bail!("Unknown command '{other}'. Run 'acquireq --help' for usage."),
    };
    Ok(request)
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing required argument <{name}>"))
}

fn resource(matches: &ArgMatches) -> Result<ResourceId> {
    required(matches, "resource").map(ResourceId::new)
}

fn claimant(matches: &ArgMatches) -> Result<ClaimantId> {
    matches
        .get_one::<i64>("claimant")
        .copied()
        .map(ClaimantId::new)
        .ok_or_else(|| anyhow::anyhow!("Missing required argument <claimant>"))
}

#[allow(clippy::print_stdout)]
fn print_line(line: &Line) {
    println!("{}", line.to_json());
}

/// Render an error for stderr, including its stable code when it has one
pub fn format_error(err: &anyhow::Error) -> String {
    err.downcast_ref::<acquireq_core::Error>()
        .map_or_else(|| format!("{err:#}"), |core| format!("[{}] {core}", core.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_cli;

    fn request(args: &[&str]) -> Result<Request> {
        let matches = build_cli().try_get_matches_from(args)?;
        let (name, sub_m) = matches
            .subcommand()
            .ok_or_else(|| anyhow::anyhow!("no subcommand"))?;
        request_from(name, sub_m)
    }

    #[test]
    fn test_join_request_from_args() -> Result<()> {
        let parsed = request(&["acquireq", "join", "r1", "alice", "--id", "4"])?;
        assert_eq!(
            parsed,
            Request::Join {
                resource_id: ResourceId::new("r1"),
                label: "alice".to_string(),
                contact: None,
                claimant_id: Some(ClaimantId::new(4)),
            }
        );
        Ok(())
    }

    #[test]
    fn test_claimant_must_be_numeric() {
        assert!(request(&["acquireq", "accept", "r1", "bob"]).is_err());
    }

    #[test]
    fn test_flags_override_config() -> Result<()> {
        let matches =
            build_cli().try_get_matches_from(["acquireq", "sweep", "--db", "x.db", "--log", "debug"])?;
        let config = apply_flags(Config::default(), &matches);
        assert_eq!(config.database_path, PathBuf::from("x.db"));
        assert_eq!(config.log_filter, "debug");
        Ok(())
    }

    #[test]
    fn test_format_error_includes_code() {
        let err = anyhow::Error::from(acquireq_core::Error::ResourceNotFound("r1".into()));
        assert!(format_error(&err).starts_with("[RESOURCE_NOT_FOUND]"));
    }
}
