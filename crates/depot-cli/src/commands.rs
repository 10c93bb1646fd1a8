use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use colored::Colorize;
use depot_proxy::{AttributeStorage, InvalidationToken, ProxyCache, RawProxyStore};
use depot_store::{BlobStore, FileBlobStore};
use depot_types::{BlobId, Headers, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER};
use serde_json::json;
use tracing::debug;

use crate::cli::*;
use crate::config::DepotConfig;

const CREATED_BY: &str = "depot-cli";
/// Creator tag of proxied content; sweeps only ever touch blobs carrying it.
const PROXY_CREATED_BY: &str = "depot-proxy";

pub async fn run_command(cli: Cli, config: DepotConfig) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Put(args) => cmd_put(&config, args, format),
        Command::Get(args) => cmd_get(&config, args),
        Command::Delete(args) => cmd_delete(&config, args, format),
        Command::Compact => cmd_compact(&config, format).await,
        Command::List(args) => cmd_list(&config, args, format),
        Command::Stats => cmd_stats(&config, format),
        Command::Fetch(args) => cmd_fetch(&config, args, format).await,
        Command::Invalidate => cmd_invalidate(&config, format),
    }
}

fn open_store(config: &DepotConfig) -> anyhow::Result<FileBlobStore> {
    let dir = config.blobs_dir();
    FileBlobStore::open(&dir, config.store.clone()).with_context(|| format!("opening blob store at {}", dir.display()))
}

fn proxy_backing(config: &DepotConfig, blobs: Arc<FileBlobStore>) -> RawProxyStore {
    RawProxyStore::new(blobs, AttributeStorage::new(config.attributes_dir()), PROXY_CREATED_BY)
}

fn parse_id(raw: &str) -> anyhow::Result<BlobId> {
    BlobId::new(raw).with_context(|| format!("invalid blob id {raw:?}"))
}

/// Stream `reader` to `output`, or to stdout when no output is given. File
/// output goes through a temp file so a failed copy leaves nothing behind.
fn write_output(reader: &mut dyn Read, output: Option<&Path>) -> anyhow::Result<u64> {
    let Some(output) = output else {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let copied = io::copy(reader, &mut lock)?;
        lock.flush()?;
        return Ok(copied);
    };
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    let copied = io::copy(reader, &mut tmp)?;
    tmp.persist(output)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(copied)
}

fn cmd_put(config: &DepotConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name; pass --name", args.file.display()))?,
    };

    let mut headers = Headers::new();
    headers.insert(BLOB_NAME_HEADER.into(), name.clone());
    headers.insert(CREATED_BY_HEADER.into(), CREATED_BY.into());
    if let Some(content_type) = args.content_type {
        headers.insert(CONTENT_TYPE_HEADER.into(), content_type);
    }

    let mut file = File::open(&args.file).with_context(|| format!("opening {}", args.file.display()))?;
    let blob = store.create(&mut file, headers)?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "id": blob.id().as_str(), "name": name, "size": blob.size(), "sha1": blob.metrics().sha1.to_hex() })
        ),
        OutputFormat::Text => {
            println!("{} Stored {}", "✓".green().bold(), name.bold());
            println!("  Id:   {}", blob.id().as_str().yellow());
            println!("  Size: {} bytes", blob.size());
            println!("  SHA1: {}", blob.metrics().sha1.to_hex().dimmed());
        }
    }
    Ok(())
}

fn cmd_get(config: &DepotConfig, args: GetArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let id = parse_id(&args.id)?;
    let Some(blob) = store.get(&id)? else {
        bail!("blob {id} not found");
    };

    let copied = if args.no_verify {
        let mut blob = blob;
        write_output(&mut blob, args.output.as_deref())?
    } else {
        let mut reader = blob.verified_reader();
        write_output(&mut reader, args.output.as_deref()).with_context(|| format!("reading blob {id}"))?
    };
    debug!(%id, bytes = copied, "blob written");

    if let Some(output) = &args.output {
        println!("{} Wrote {} bytes to {}", "✓".green().bold(), copied, output.display());
    }
    Ok(())
}

fn cmd_delete(config: &DepotConfig, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let id = parse_id(&args.id)?;
    let deleted = store.delete(&id)?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "id": id.as_str(), "deleted": deleted })),
        OutputFormat::Text if deleted => println!("{} Deleted {}", "✓".green().bold(), id.as_str().yellow()),
        OutputFormat::Text => println!("No live blob {}", id.as_str().yellow()),
    }
    Ok(())
}

async fn cmd_compact(config: &DepotConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = Arc::new(open_store(config)?);
    let swept = proxy_backing(config, store.clone()).sweep().await?;
    let report = store.compact()?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "swept": swept.discarded,
                "sweep_busy": swept.busy,
                "reclaimed": report.reclaimed,
                "bytes_reclaimed": report.bytes_reclaimed,
                "skipped": report.skipped,
                "metadata_rewritten": report.metadata_rewritten,
            })
        ),
        OutputFormat::Text => {
            if swept.discarded > 0 || swept.busy > 0 {
                println!(
                    "{} Sweep: {} unreferenced proxy blobs tombstoned, {} still open",
                    "✓".green(),
                    swept.discarded.to_string().bold(),
                    swept.busy
                );
            }
            println!(
                "{} Compaction: {} blobs removed, {} bytes reclaimed",
                "✓".green(),
                report.reclaimed.to_string().bold(),
                report.bytes_reclaimed
            );
            if report.skipped > 0 {
                println!("  {} blobs busy; left for next run", report.skipped.to_string().yellow());
            }
        }
    }
    Ok(())
}

fn cmd_list(config: &DepotConfig, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut records = store.list(args.all)?;
    records.sort_by(|a, b| a.creation_time.cmp(&b.creation_time));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text if records.is_empty() => println!("No blobs."),
        OutputFormat::Text => {
            for record in &records {
                let name = record.headers.get(BLOB_NAME_HEADER).map(String::as_str).unwrap_or("-");
                let state = if record.is_live() { "live".green() } else { "deleted".red() };
                println!(
                    "{}  {:>10}  {}  {}  {}",
                    record.blob_id.as_str().yellow(),
                    record.content_size,
                    record.sha1.to_hex().dimmed(),
                    state,
                    name
                );
            }
        }
    }
    Ok(())
}

fn cmd_stats(config: &DepotConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let metrics = store.metrics()?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "live_blobs": metrics.live_blobs,
                "live_bytes": metrics.live_bytes,
                "deleted_blobs": metrics.deleted_blobs,
                "deleted_bytes": metrics.deleted_bytes,
            })
        ),
        OutputFormat::Text => {
            println!("Blob store at {}", config.blobs_dir().display().to_string().bold());
            println!("  Live:    {} blobs, {} bytes", metrics.live_blobs.to_string().green(), metrics.live_bytes);
            println!("  Deleted: {} blobs, {} bytes", metrics.deleted_blobs.to_string().yellow(), metrics.deleted_bytes);
        }
    }
    Ok(())
}

fn load_token(config: &DepotConfig) -> anyhow::Result<InvalidationToken> {
    let path = config.token_file();
    match fs::read_to_string(&path) {
        Ok(text) => Ok(InvalidationToken::resume(&text).unwrap_or_default()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(InvalidationToken::new()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn save_token(config: &DepotConfig, token: &str) -> anyhow::Result<()> {
    let path = config.token_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, token).with_context(|| format!("writing {}", path.display()))
}

async fn cmd_fetch(config: &DepotConfig, args: FetchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut proxy_config = config.proxy.clone().unwrap_or_default();
    if let Some(remote) = args.remote {
        proxy_config.remote_url = remote;
    }
    if proxy_config.remote_url.is_empty() {
        bail!("no remote configured; set [proxy] remote_url in the config or pass --remote");
    }

    let blobs = Arc::new(open_store(config)?);
    let backing = Arc::new(proxy_backing(config, blobs));
    let token = Arc::new(load_token(config)?);
    let proxy = ProxyCache::with_token("cli", proxy_config, backing, token)?;
    proxy.start()?;

    let ctx = depot_proxy::Context::new(&args.path)?;
    let Some(content) = proxy.get(&ctx).await? else {
        bail!("{} is not available", args.path);
    };

    let summary = json!({
        "path": ctx.path(),
        "id": content.blob().id().as_str(),
        "size": content.size(),
        "etag": content.content_info.etag,
        "last_verified": content.cache_info.as_ref().map(|c| c.last_verified.to_rfc3339()),
    });
    let output = args.output.clone();
    let copied = tokio::task::spawn_blocking(move || {
        let mut reader = content.into_blob().verified_reader();
        write_output(&mut reader, output.as_deref())
    })
    .await??;
    proxy.stop()?;

    if let Some(output) = &args.output {
        match format {
            OutputFormat::Json => println!("{summary}"),
            OutputFormat::Text => println!(
                "{} Fetched {} ({} bytes) to {}",
                "✓".green().bold(),
                ctx.path().bold(),
                copied,
                output.display()
            ),
        }
    }
    Ok(())
}

fn cmd_invalidate(config: &DepotConfig, format: OutputFormat) -> anyhow::Result<()> {
    let token = load_token(config)?;
    let issued = token.rotate();
    save_token(config, &issued)?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "cache_token": issued })),
        OutputFormat::Text => println!("{} Proxy caches expired (token {})", "✓".green().bold(), issued.dimmed()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> DepotConfig {
        let mut config = DepotConfig {
            root: dir.to_path_buf(),
            ..DepotConfig::default()
        };
        config.store.sync_content = false;
        config
    }

    #[tokio::test]
    async fn put_delete_compact_flow() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let input = dir.path().join("hello.txt");
        fs::write(&input, b"hello").unwrap();

        cmd_put(
            &config,
            PutArgs {
                file: input,
                name: None,
                content_type: Some("text/plain".into()),
            },
            OutputFormat::Json,
        )
        .unwrap();

        let store = open_store(&config).unwrap();
        let records = store.list(false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].headers.get(BLOB_NAME_HEADER).unwrap(), "hello.txt");
        assert_eq!(records[0].headers.get(CREATED_BY_HEADER).unwrap(), CREATED_BY);
        let id = records[0].blob_id.to_string();
        drop(store);

        let out = dir.path().join("copy.txt");
        cmd_get(
            &config,
            GetArgs {
                id: id.clone(),
                output: Some(out.clone()),
                no_verify: false,
            },
        )
        .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"hello");

        cmd_delete(&config, DeleteArgs { id: id.clone() }, OutputFormat::Text).unwrap();
        assert!(cmd_get(
            &config,
            GetArgs {
                id,
                output: None,
                no_verify: false,
            },
        )
        .is_err());

        cmd_compact(&config, OutputFormat::Text).await.unwrap();
        assert!(open_store(&config).unwrap().list(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn compact_sweeps_unreferenced_proxy_blobs_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let input = dir.path().join("kept.txt");
        fs::write(&input, b"kept").unwrap();
        cmd_put(
            &config,
            PutArgs {
                file: input,
                name: None,
                content_type: None,
            },
            OutputFormat::Json,
        )
        .unwrap();

        let store = open_store(&config).unwrap();
        let mut headers = Headers::new();
        headers.insert(BLOB_NAME_HEADER.into(), "org/a.jar".into());
        headers.insert(CREATED_BY_HEADER.into(), PROXY_CREATED_BY.into());
        drop(store.create(&mut &b"orphan"[..], headers).unwrap());
        drop(store);

        cmd_compact(&config, OutputFormat::Json).await.unwrap();
        let records = open_store(&config).unwrap().list(true).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].headers.get(CREATED_BY_HEADER).unwrap(), CREATED_BY);
    }

    #[test]
    fn invalidate_persists_a_newer_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(load_token(&config).unwrap().current(), None);

        cmd_invalidate(&config, OutputFormat::Text).unwrap();
        let first = load_token(&config).unwrap().current().unwrap();
        cmd_invalidate(&config, OutputFormat::Text).unwrap();
        let second = load_token(&config).unwrap().current().unwrap();

        assert!(second.parse::<u64>().unwrap() > first.parse::<u64>().unwrap());
    }

    #[test]
    fn get_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let err = cmd_get(
            &config,
            GetArgs {
                id: "../etc/passwd".into(),
                output: None,
                no_verify: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid blob id"));
    }
}
