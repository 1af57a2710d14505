use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use orange_uploader::plugins::registry::UploadCliConfig;
use orange_uploader::{
    FileSource, Fingerprint, PluginRegistry, ResumeCache, SqliteStore, UploadEvent, UploadOptions,
    UploadOutcome, UploadSource, Uploader,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

fn file_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("file")
            .help("File to upload (forget only reads it when no fingerprint is given)")
            .required(true)
            .num_args(1),
    )
    .arg(
        Arg::new("fingerprint")
            .long("fingerprint")
            .help("Resume key for the file (default: derived from name, type and size)")
            .num_args(1),
    )
    .arg(
        Arg::new("content_type")
            .long("content-type")
            .help("MIME type of the file")
            .default_value("application/octet-stream")
            .num_args(1),
    )
    .arg(
        Arg::new("state_db")
            .long("state-db")
            .help("SQLite file holding resume locations")
            .default_value(".orange-uploader.sqlite")
            .num_args(1),
    )
}

fn build_cli(registry: &PluginRegistry) -> Command {
    let upload = file_args(Command::new("upload").about("Upload a file, resuming a previous attempt if possible"))
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .help("Upload creation endpoint")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("chunk_kb")
                .long("chunk-kb")
                .help("Chunk size in KiB")
                .default_value("1024")
                .num_args(1),
        )
        .arg(
            Arg::new("no_resume")
                .long("no-resume")
                .help("Ignore and discard any cached resume location")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("reset")
                .long("reset")
                .help("Discard the cached resume location before this upload")
                .action(ArgAction::SetTrue),
        );

    let upload = registry.augment_upload_command(upload);

    let forget = file_args(Command::new("forget").about("Forget the cached resume location of a file"));

    Command::new("orange-uploader")
        .about("Resumable chunked file uploader")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(upload)
        .subcommand(forget)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

async fn open_source(m: &ArgMatches) -> anyhow::Result<FileSource> {
    let path: PathBuf = m.get_one::<String>("file").context("missing file")?.into();
    let content_type = m
        .get_one::<String>("content_type")
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    FileSource::open(&path, content_type).await
}

async fn open_store(m: &ArgMatches) -> anyhow::Result<SqliteStore> {
    let db: PathBuf = m.get_one::<String>("state_db").context("missing state db")?.into();
    SqliteStore::open(&db).await
}

async fn run_upload(registry: &mut PluginRegistry, m: &ArgMatches) -> anyhow::Result<()> {
    let endpoint = m.get_one::<String>("endpoint").context("missing endpoint")?.clone();
    let chunk_kb: u64 = m.get_one::<String>("chunk_kb").context("missing chunk size")?.parse()?;

    let mut cfg = UploadCliConfig::default();
    registry.apply_upload_matches(m, &mut cfg)?;
    registry.install_transports(&cfg.driver_ctx)?;

    let endpoint_url = Url::parse(&endpoint).with_context(|| format!("invalid endpoint {}", endpoint))?;
    let transport = registry
        .transport_for(&endpoint_url)
        .with_context(|| format!("no transport for scheme {}", endpoint_url.scheme()))?;

    let store = open_store(m).await?;
    let source = Arc::new(open_source(m).await?);
    let total = source.size();

    let mut options = UploadOptions::new(endpoint, chunk_kb.saturating_mul(1024))
        .resumable(!m.get_flag("no_resume"))
        .reset_before(m.get_flag("reset"));
    options.headers = cfg.headers;
    options.fingerprint = m.get_one::<String>("fingerprint").cloned();

    let uploader = Uploader::new(transport, Arc::new(store));
    let mut handle = uploader.start(source.clone(), options)?;

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let pb = ProgressBar::new(total);
    pb.set_style(ProgressStyle::with_template(
        "{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {wide_msg}",
    )?);
    pb.set_prefix(format!("[{}]", source.name()));

    while let Some(evt) = handle.next_event().await {
        match evt {
            UploadEvent::StateChanged { state, .. } => {
                pb.set_message(format!("{:?}", state).to_lowercase());
            }
            UploadEvent::ResourceReady { location, offset, resumed, .. } => {
                if resumed {
                    pb.println(format!("resuming {} at {}", location, offset));
                }
                pb.set_position(offset);
            }
            UploadEvent::Progress { bytes_written, .. } => {
                pb.set_position(bytes_written);
            }
        }
    }

    match handle.wait().await {
        Ok(UploadOutcome::Completed { location }) => {
            pb.finish_with_message("done");
            println!("{}", location);
            Ok(())
        }
        Ok(UploadOutcome::Cancelled) => {
            pb.abandon_with_message("cancelled");
            eprintln!("upload cancelled; run the same command again to resume");
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e).context("upload failed")
        }
    }
}

async fn run_forget(m: &ArgMatches) -> anyhow::Result<()> {
    let store = Arc::new(open_store(m).await?);
    let fingerprint = match m.get_one::<String>("fingerprint") {
        Some(f) => Fingerprint::from(f.as_str()),
        None => {
            let source = open_source(m).await?;
            Fingerprint::derive(source.name(), source.mime_type(), source.size())
        }
    };

    let cache = ResumeCache::new(store);
    match cache.get(&fingerprint).await {
        Some(location) => {
            cache.clear(&fingerprint).await;
            println!("forgot {} ({})", fingerprint, location);
        }
        None => println!("nothing cached for {}", fingerprint),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut registry = PluginRegistry::with_defaults();
    let app = build_cli(&registry);
    let matches = app.get_matches();

    match matches.subcommand() {
        Some(("upload", m)) => run_upload(&mut registry, m).await?,
        Some(("forget", m)) => run_forget(m).await?,
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orange_uploader::ResumeStore;

    #[tokio::test]
    async fn forget_by_fingerprint_does_not_need_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state.sqlite");
        SqliteStore::open(&db)
            .await
            .unwrap()
            .set("custom-key", "http://server/files/9")
            .await
            .unwrap();

        let registry = PluginRegistry::with_defaults();
        let missing = dir.path().join("missing.bin");
        let matches = build_cli(&registry)
            .try_get_matches_from([
                "orange-uploader",
                "forget",
                "--fingerprint",
                "custom-key",
                "--state-db",
                db.to_str().unwrap(),
                missing.to_str().unwrap(),
            ])
            .unwrap();
        let (_, m) = matches.subcommand().unwrap();
        run_forget(m).await.unwrap();

        let store = SqliteStore::open(&db).await.unwrap();
        assert_eq!(store.get("custom-key").await.unwrap(), None);
    }
}
