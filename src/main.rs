use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use gapps_mirror::core::events::QueueEvent;
use gapps_mirror::{form_package, parse_asset, Config, DownloadQueue, NameFormat, ReleaseAsset};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn build_cli() -> Command {
    let parse = Command::new("parse")
        .about("Parse an artifact filename and print the package as JSON")
        .arg(Arg::new("name").help("Asset filename").required(true))
        .arg(
            Arg::new("url")
                .long("url")
                .help("Asset download URL")
                .default_value("https://github.com/opengapps/")
                .num_args(1),
        );

    let mirror = Command::new("mirror")
        .about("Download one artifact, verify it and publish it to the configured tiers")
        .arg(Arg::new("name").long("name").help("Asset filename").required(true).num_args(1))
        .arg(Arg::new("url").long("url").help("Asset download URL").required(true).num_args(1))
        .arg(
            Arg::new("size")
                .long("size")
                .help("Declared asset size in bytes (0 = unknown)")
                .default_value("0")
                .num_args(1),
        )
        .arg(
            Arg::new("md5_url")
                .long("md5-url")
                .help("Download URL of the .md5 checksum sidecar")
                .required(true)
                .num_args(1),
        )
        .arg(Arg::new("local_path").long("local-path").help("Local storage root").num_args(1))
        .arg(
            Arg::new("local_url")
                .long("local-url")
                .help("Local URL template, %s is the path below the storage root")
                .num_args(1),
        )
        .arg(
            Arg::new("remote_url")
                .long("remote-url")
                .help("Upload URL template, %s is the artifact name")
                .num_args(1),
        );

    Command::new("gapps-mirror")
        .about("Mirror OpenGApps release artifacts to local and remote storage")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .help("TOML config file")
                .global(true)
                .num_args(1),
        )
        .subcommand(parse)
        .subcommand(mirror)
}

async fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let cfg = match matches.get_one::<String>("config") {
        Some(path) => Config::load(&PathBuf::from(path)).await?,
        None => Config::default(),
    };
    Ok(cfg)
}

fn apply_overrides(m: &ArgMatches, cfg: &mut Config) -> anyhow::Result<()> {
    if let Some(p) = m.get_one::<String>("local_path") {
        cfg.gapps.local_path = Some(PathBuf::from(p));
    }
    if let Some(u) = m.get_one::<String>("local_url") {
        cfg.gapps.local_url = Some(u.clone());
    }
    if let Some(u) = m.get_one::<String>("remote_url") {
        cfg.gapps.remote_url = Some(u.clone());
    }
    *cfg = std::mem::take(cfg).normalized();
    cfg.validate()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("parse", m)) => {
            let cfg = load_config(m).await?;
            let name = m.get_one::<String>("name").context("name is required")?;
            let url = m.get_one::<String>("url").context("url has a default")?;

            let asset = ReleaseAsset::new(name.as_str(), url.as_str(), 0);
            let pkg = parse_asset(&asset, "", &NameFormat::from_config(&cfg.gapps))?;
            println!("{}", serde_json::to_string_pretty(&pkg)?);
        }
        Some(("mirror", m)) => {
            let mut cfg = load_config(m).await?;
            apply_overrides(m, &mut cfg)?;

            let name = m.get_one::<String>("name").context("name is required")?;
            let url = m.get_one::<String>("url").context("url is required")?;
            let size: u64 = m.get_one::<String>("size").context("size has a default")?.parse()?;
            let md5_url = m.get_one::<String>("md5_url").context("md5-url is required")?;

            let zip_asset = ReleaseAsset::new(name.as_str(), url.as_str(), size);
            let md5_asset = ReleaseAsset::new(format!("{name}.md5"), md5_url.as_str(), 0);

            let queue = DownloadQueue::new(&cfg.queue)?;

            let cancel = queue.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, cancelling downloads");
                    cancel.cancel();
                }
            });

            let ui_task = tokio::spawn(render_events(queue.subscribe()));

            let result = async {
                let mut pkg = form_package(&queue, &NameFormat::from_config(&cfg.gapps), &zip_asset, &md5_asset).await?;
                pkg.create_mirror(&queue, &cfg.gapps).await?;
                Ok::<_, gapps_mirror::Error>(pkg)
            }
            .await;

            drop(queue);
            let _ = ui_task.await;

            let pkg = result.map_err(anyhow::Error::from)?;
            println!("{}", serde_json::to_string_pretty(&pkg)?);
        }
        _ => {}
    }

    Ok(())
}

async fn render_events(mut rx: tokio::sync::broadcast::Receiver<QueueEvent>) {
    let mp = MultiProgress::new();
    let sty_spin = ProgressStyle::with_template("{spinner:.green} {prefix} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("|/-\\ ");
    let sty_bar = ProgressStyle::with_template(
        "{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());

    let mut bars: HashMap<Uuid, ProgressBar> = HashMap::new();

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(_) => break,
        };

        match evt {
            QueueEvent::Queued { job_id, uri } => {
                let pb = mp.add(ProgressBar::new_spinner());
                pb.set_style(sty_spin.clone());
                pb.set_prefix(format!("[{}]", short_name(&uri)));
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                pb.set_message("queued");
                bars.insert(job_id, pb);
            }
            QueueEvent::AttemptStarted { job_id, attempt, max_attempts } => {
                if let Some(pb) = bars.get(&job_id) {
                    pb.set_message(format!("attempt {attempt}/{max_attempts}"));
                }
            }
            QueueEvent::Progress { job_id, downloaded, total, speed_bps, eta } => {
                let Some(pb) = bars.get(&job_id) else { continue };
                if let Some(t) = total {
                    if pb.length().unwrap_or(0) != t {
                        pb.set_style(sty_bar.clone());
                        pb.set_length(t);
                    }
                    pb.set_position(downloaded.min(t));
                }
                let eta_s = eta.map(|d| format!("{:.0}s", d.as_secs_f64())).unwrap_or_else(|| "-".to_string());
                pb.set_message(format!("{} | {}/s | eta {}", fmt_bytes(downloaded), fmt_bytes(speed_bps), eta_s));
            }
            QueueEvent::ChunkDone { job_id, completed, total } => {
                if let Some(pb) = bars.get(&job_id) {
                    pb.set_message(format!("chunks {completed}/{total}"));
                }
            }
            QueueEvent::AttemptFailed { job_id, attempt, message } => {
                let _ = mp.println(format!("[RETRY] job={job_id} attempt={attempt}: {message}"));
                if let Some(pb) = bars.get(&job_id) {
                    pb.set_position(0);
                }
            }
            QueueEvent::Finished { job_id, path } => {
                if let Some(pb) = bars.remove(&job_id) {
                    pb.finish_with_message(format!("done -> {}", path.display()));
                }
            }
            QueueEvent::Failed { job_id, message } => {
                if let Some(pb) = bars.remove(&job_id) {
                    pb.abandon_with_message(format!("failed: {message}"));
                }
            }
        }
    }
}

fn short_name(uri: &str) -> &str {
    uri.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(uri)
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
