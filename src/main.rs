use clap::{Arg, ArgAction, Command};
use std::process::ExitCode;
use std::time::Duration;
use vocsign::adapters::http::HttpClient;
use vocsign::adapters::nss_worker;
use vocsign::infra::config::ConfigManager;
use vocsign::infra::paths;
use vocsign::pipelines::{ScanWorkflow, SignInput, SignWorkflow};
use vocsign::services::{AuditLog, IdentityStore};
use vocsign::{Context, SignerResult};

fn main() -> ExitCode {
    env_logger::init();

    // The hidden NSS worker mode must be handled before clap: its arguments
    // are part of the subprocess protocol, not the user CLI.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some(nss_worker::WORKER_FLAG) {
        return ExitCode::from(nss_worker::run(&args[2..]) as u8);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> SignerResult<()> {
    // clap prints help/usage errors and exits on its own.
    let matches = cli().get_matches_from(args);

    let config = ConfigManager::new()?.load_or_create_default()?;
    let app_data = paths::app_data_dir()?;
    let store_dir = config
        .store_dir
        .clone()
        .unwrap_or_else(|| app_data.join("store"));
    let store = IdentityStore::open(&store_dir, config.vault_password.as_bytes())?;
    let audit = AuditLog::open(&app_data)?;
    let http = HttpClient::new(&config);

    match matches.subcommand() {
        Some(("sign", sub)) => {
            let input = SignInput {
                manifest_url: sub
                    .get_one::<String>("url")
                    .cloned()
                    .unwrap_or_default(),
                identity_id: sub
                    .get_one::<String>("identity")
                    .cloned()
                    .unwrap_or_default(),
                birth_date: sub
                    .get_one::<String>("birth-date")
                    .cloned()
                    .unwrap_or_default(),
            };
            let ctx = Context::background();
            let workflow = SignWorkflow::new(&http, &store, &audit);
            let outcome = workflow.run(&input, &ctx)?;
            println!(
                "signed request {}: receipt {} ({})",
                outcome.manifest.request_id, outcome.receipt.receipt_id, outcome.receipt.status
            );
            Ok(())
        }
        Some(("import", sub)) => {
            let file = sub.get_one::<String>("file").cloned().unwrap_or_default();
            let name = sub
                .get_one::<String>("name")
                .cloned()
                .unwrap_or_else(|| file.clone());
            let password = sub
                .get_one::<String>("password")
                .cloned()
                .unwrap_or_default();
            let data = std::fs::read(&file)?;
            match store.import(&name, &data, &password) {
                Ok(identity) => {
                    println!("imported {} ({})", identity.friendly_name, identity.id);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}", e.friendly_import_message());
                    Err(e)
                }
            }
        }
        Some(("list", _)) => {
            let identities = store.list()?;
            if identities.is_empty() {
                println!("no identities imported");
            }
            for identity in identities {
                println!(
                    "{}  {}  {}",
                    identity.id,
                    identity.friendly_name,
                    identity.fingerprint_hex()
                );
            }
            Ok(())
        }
        Some(("delete", sub)) => {
            let id = sub.get_one::<String>("id").cloned().unwrap_or_default();
            store.delete(&id)?;
            println!("deleted {id}");
            Ok(())
        }
        Some(("scan", _)) => {
            let ctx = Context::background();
            let workflow = ScanWorkflow::new(
                &store,
                config.scan_parallelism,
                Duration::from_secs(config.scan_timeout_seconds),
            );
            let outcome = workflow.run(&ctx)?;
            for system in &outcome.identities {
                println!(
                    "{}  {}",
                    system.identity.id, system.identity.friendly_name
                );
            }
            for path in &outcome.locked_p12 {
                println!("locked (password required): {}", path.display());
            }
            for error in &outcome.errors {
                eprintln!("store failed: {error}");
            }
            println!(
                "{} new identities, {} locked files",
                outcome.identities.len(),
                outcome.locked_p12.len()
            );
            Ok(())
        }
        Some(("audit", sub)) => {
            let verbose = sub.get_flag("verbose");
            for entry in audit.read_all()? {
                if verbose {
                    println!(
                        "{}  {}  {}  title={:?} signer={} dni={} host={} fp={} ack={} {}",
                        entry.timestamp,
                        entry.request_id,
                        entry.status,
                        entry.proposal_title,
                        entry.signer_name,
                        entry.signer_dni,
                        entry.callback_host,
                        entry.cert_fingerprint,
                        entry.server_ack_id,
                        entry.error
                    );
                } else {
                    println!(
                        "{}  {}  {}  {}",
                        entry.timestamp, entry.request_id, entry.status, entry.error
                    );
                }
            }
            Ok(())
        }
        _ => {
            // clap's arg_required_else_help covers this.
            Ok(())
        }
    }
}

fn cli() -> Command {
    Command::new("vocsign")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signer for citizen signatures on legislative proposals")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("sign")
                .about("Fetch a proposal manifest, sign it, and submit the signature")
                .arg(
                    Arg::new("url")
                        .short('u')
                        .long("url")
                        .value_name("URL")
                        .help("Manifest URL published by the organizer")
                        .required(true),
                )
                .arg(
                    Arg::new("identity")
                        .short('i')
                        .long("identity")
                        .value_name("ID")
                        .help("Identity id from `vocsign list`")
                        .required(true),
                )
                .arg(
                    Arg::new("birth-date")
                        .short('b')
                        .long("birth-date")
                        .value_name("YYYY-MM-DD")
                        .help("Signer birth date for the attestation")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Import a .p12/.pfx certificate into the local wallet")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .help("PKCS#12 file to import")
                        .required(true),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Friendly name (defaults to the file name)"),
                )
                .arg(
                    Arg::new("password")
                        .short('p')
                        .long("password")
                        .value_name("PASSWORD")
                        .help("Certificate password (omit for passwordless exports)"),
                ),
        )
        .subcommand(Command::new("list").about("List imported identities"))
        .subcommand(
            Command::new("delete")
                .about("Delete an imported identity")
                .arg(
                    Arg::new("id")
                        .value_name("ID")
                        .help("Identity id to delete")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Discover certificates in the OS keychain, browser NSS profiles, and loose .p12 files"),
        )
        .subcommand(
            Command::new("audit")
                .about("Show the signature audit log")
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Include full entries"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_sign_requires_all_arguments() {
        let result = cli().try_get_matches_from(["vocsign", "sign", "--url", "https://x"]);
        assert!(result.is_err());
    }
}
