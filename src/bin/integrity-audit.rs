use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use clap::Parser;
use log::{error, info};
use integrity_audit::audit::IntegrityAudit;
use integrity_audit::commons::clock::SystemClock;
use integrity_audit::config::Config;
use integrity_audit::constants::{
    DEFAULT_CONFIG_FILE, ENV_CONFIG_FILE, INTEGRITY_AUDIT_APP
};


//------------ Options -------------------------------------------------------

/// The command line options of the daemon.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Audits replicated databases against each other.",
)]
struct Options {
    /// Override the path to the config file
    #[arg(
        short, long,
        value_name = "FILE",
        env = ENV_CONFIG_FILE,
        default_value = DEFAULT_CONFIG_FILE,
    )]
    config: PathBuf,
}


//------------ main ----------------------------------------------------------

fn main() {
    let options = Options::parse();
    let config = match Config::create(&options.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let mut audit = match IntegrityAudit::new(
        config.resource_name(),
        config.persistence_unit(),
        &config.properties,
        Arc::new(SystemClock),
    ) {
        Ok(audit) => audit,
        Err(e) => {
            error!("{} failed to start: {}", INTEGRITY_AUDIT_APP, e);
            process::exit(1);
        }
    };
    if let Err(e) = audit.start() {
        error!("{} failed to start: {}", INTEGRITY_AUDIT_APP, e);
        process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot create runtime: {}", e);
            audit.stop();
            process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
        error!("Cannot listen for shutdown signal: {}", e);
    }

    info!("{} shutting down", INTEGRITY_AUDIT_APP);
    audit.stop();
}
