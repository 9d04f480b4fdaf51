//! Lintel - account certificate authority

use clap::Parser;
use tracing::{error, info};

use lintel::{
    certs::{load_root_key, sign_root_certificate, RootAuthority},
    config::{Args, Command},
    logging,
    service::{spawn_sweeper, CaService},
    version::version_info,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    match args.command.clone() {
        Some(Command::Version) => {
            println!("{}", version_info());
            Ok(())
        }
        Some(Command::ResignRoot { out }) => resign_root(&args, out),
        Some(Command::Check) => check_root(&args),
        Some(Command::Sweep) => {
            let service = build_service(&args).await;
            let report = service.sweep_once().await?;
            info!(
                "Removed {} expired sessions and {} expired vault locks",
                report.sessions, report.locks
            );
            Ok(())
        }
        None => run(&args).await,
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    info!("======================================");
    info!("  Lintel - account certificate authority");
    info!("  {}", version_info());
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Root key: {}", args.root.key.display());
    info!("Root certificate: {}", args.root.cert.display());
    info!("Account certificates: {} days", args.account_cert_days);
    info!(
        "TTLs: ceremony {}s, identity {}s, vault lock {}s",
        args.ceremony_ttl_secs, args.identity_ttl_secs, args.vault_lock_ttl_secs
    );
    let rp = args.relying_party();
    info!("Relying party: {} ({})", rp.id, rp.origin);
    if !args.dev_mode {
        info!("MongoDB: {}/{}", args.mongodb_uri, args.mongodb_db);
    }
    info!("======================================");

    let service = build_service(args).await;

    let sweeper = args
        .sweep_interval()
        .map(|interval| spawn_sweeper(service.clone(), interval));

    info!("Lintel ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(handle) = sweeper {
        handle.abort();
    }
    Ok(())
}

/// Build the service or exit: without root material nothing can be issued.
async fn build_service(args: &Args) -> CaService {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match CaService::build(args).await {
        Ok(service) => service,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn resign_root(args: &Args, out: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let key = match load_root_key(&args.root.key) {
        Ok(key) => key,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let pem = sign_root_certificate(&key, &args.root_profile())?;
    let out = out.unwrap_or_else(|| args.root.cert.clone());
    std::fs::write(&out, pem)?;

    info!(
        "Wrote root certificate for {} valid {} days to {}",
        args.root.common_name,
        args.root.valid_days,
        out.display()
    );
    Ok(())
}

fn check_root(args: &Args) -> anyhow::Result<()> {
    match RootAuthority::load(&args.root.key, &args.root.cert) {
        Ok(root) => {
            let cert = root.certificate();
            println!("subject:    {}", cert.subject_cn.as_deref().unwrap_or("-"));
            println!("serial:     {}", cert.serial);
            println!("not before: {}", cert.not_before);
            println!("not after:  {}", cert.not_after);
            println!("ca:         {}", cert.is_ca);
            Ok(())
        }
        Err(e) => {
            error!("Root material check failed: {}", e);
            std::process::exit(1);
        }
    }
}
