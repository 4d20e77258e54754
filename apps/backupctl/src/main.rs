use clap::{Parser, Subcommand};

mod client;

#[derive(Parser)]
#[command(name = "backupctl", version, about = "Control a running backupd")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    Ping,
    Status,
    /// Run one backup pass now and wait for it.
    Backup,
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.cmd {
        Cmd::Ping => {
            let resp = client::ping().await?;
            println!("{resp}");
        }
        Cmd::Status => {
            let (daemon, backups) = client::status().await?;
            print!("{}", client::render::status(&daemon, &backups));
        }
        Cmd::Backup => {
            let summary = client::backup_now().await?;
            print!("{}", client::render::summary(&summary));
            if !summary.is_success() {
                anyhow::bail!("backup pass finished with failures");
            }
        }
        Cmd::Shutdown => {
            let resp = client::shutdown().await?;
            println!("{resp}");
        }
    }
    Ok(())
}
