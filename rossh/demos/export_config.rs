//! Export example: learn a router's host key and print its configuration
//!
//! Connects to a RouterOS device, trusting the host key recorded in a local
//! JSON file (learning it on first contact), and prints `/export`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example export_config -- --host 192.168.88.1 --user admin --password secret
//! ```
//!
//! With SSH key authentication and the full export:
//! ```bash
//! cargo run --example export_config -- --host 192.168.88.1 --user admin --key ~/.ssh/id_ecdsa --verbose
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rossh::deploy::{ChangeSet, ConfigDeployer, ConfigDiffer};
use rossh::{HostKeyStore, JsonFileRepository, SessionBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let store = Arc::new(HostKeyStore::new(JsonFileRepository::new(&args.known_hosts)));
    let record = store.for_host(&args.host, args.port).await?;
    println!(
        "Trusting {} key {} for {}",
        record.key_type,
        record.host_key().map(|k| k.fingerprint()).unwrap_or_default(),
        record.hostname
    );

    let mut builder = SessionBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .host_key_store(store)
        .timeout(Duration::from_secs(args.timeout));

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    let mut deployer = ConfigDeployer::new(builder.build()?, NoDiff);
    let config = deployer.running_config(args.verbose).await?;

    println!("{}", "-".repeat(50));
    print!("{config}");
    println!("{}", "-".repeat(50));

    Ok(())
}

/// Differ stand-in; this example only reads configuration.
struct NoDiff;

struct NoChanges;

impl std::fmt::Display for NoChanges {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Ok(())
    }
}

impl ChangeSet for NoChanges {
    fn is_empty(&self) -> bool {
        true
    }
}

impl ConfigDiffer for NoDiff {
    type Document = ();
    type Changes = NoChanges;
    type Error = std::convert::Infallible;

    fn parse(&self, _text: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn diff(&self, _desired: &(), _base: &(), _base_verbose: Option<&()>) -> NoChanges {
        NoChanges
    }
}

/// Simple argument parser
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    known_hosts: PathBuf,
    timeout: u64,
    verbose: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = env::args().skip(1);
        let mut parsed = Args {
            host: "192.168.88.1".to_string(),
            port: 22,
            user: "admin".to_string(),
            password: None,
            key: None,
            known_hosts: PathBuf::from("hostkeys.json"),
            timeout: 10,
            verbose: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => parsed.host = args.next().unwrap_or(parsed.host),
                "--port" | "-p" => {
                    parsed.port = args.next().and_then(|v| v.parse().ok()).unwrap_or(22)
                }
                "--user" | "-u" => parsed.user = args.next().unwrap_or(parsed.user),
                "--password" | "-P" => parsed.password = args.next(),
                "--key" | "-k" => parsed.key = args.next().map(PathBuf::from),
                "--known-hosts" => {
                    parsed.known_hosts = args.next().map(PathBuf::from).unwrap_or(parsed.known_hosts)
                }
                "--timeout" | "-t" => {
                    parsed.timeout = args.next().and_then(|v| v.parse().ok()).unwrap_or(10)
                }
                "--verbose" | "-v" => parsed.verbose = true,
                "--help" => {
                    println!("Usage: export_config [OPTIONS]");
                    println!();
                    println!("Options:");
                    println!("  -h, --host <HOST>          Target host [default: 192.168.88.1]");
                    println!("  -p, --port <PORT>          SSH port [default: 22]");
                    println!("  -u, --user <USER>          Username [default: admin]");
                    println!("  -P, --password <PASSWORD>  Password");
                    println!("  -k, --key <PATH>           Private key path");
                    println!("      --known-hosts <PATH>   Host key file [default: hostkeys.json]");
                    println!("  -t, --timeout <SECONDS>    Timeout [default: 10]");
                    println!("  -v, --verbose              Use /export verbose");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}
