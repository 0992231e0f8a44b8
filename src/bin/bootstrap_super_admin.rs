use anyhow::{Context, Result, bail};
use clap::Parser;
use healthhub::{
    config::{ConfigLoader, StoreBackend},
    server::build_state,
    services::accounts::ContactDetails,
    telemetry::init_tracing,
};

/// Seeds the first super-administrator into the configured database.
#[derive(Debug, Parser)]
#[command(name = "bootstrap_super_admin", version)]
struct Args {
    #[arg(long)]
    name: String,
    #[arg(long)]
    mail: String,
    #[arg(long)]
    phone_no: String,
    /// Initial password; read from HEALTHHUB_BOOTSTRAP_PASSWORD when omitted.
    #[arg(long, env = "HEALTHHUB_BOOTSTRAP_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;

    if config.store_backend != StoreBackend::Database {
        bail!("HEALTHHUB_STORE_BACKEND must be 'database'; an in-memory account would not outlive this process");
    }

    let state = build_state(config)
        .await
        .context("connecting to the document store")?;
    let contact = ContactDetails {
        name: args.name,
        mail: args.mail,
        phone_no: args.phone_no,
    };
    let admin = state
        .accounts
        .bootstrap_super_admin(contact, &args.password)
        .await
        .context("creating super-administrator")?;

    println!("Created super-administrator {}", admin.meta.code);
    Ok(())
}
