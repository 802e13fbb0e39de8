use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::limit_from_secs, load_config, ClientConfig, FlowEvent, HttpJobApi, JobApi, Notifier,
    UploadFlowController,
};
use shared::domain::{FlowStep, JobId, JobStatus};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MERMAID_FILE: &str = "flowchart.mmd";
const PNG_FILE: &str = "flowchart.png";

#[derive(Parser, Debug)]
#[command(name = "diagram-client", about = "Turn a photographed sketch into a Mermaid flowchart")]
struct Args {
    /// Backend base URL; overrides the config file and environment.
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    /// Give up polling after this many seconds. 0 polls forever.
    #[arg(long, global = true)]
    max_poll_secs: Option<u64>,
    /// Client config file. Defaults to ./client.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an image, wait for processing and save the results.
    Run {
        image: PathBuf,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print the backend status of a job once.
    Status { job_id: String },
    /// Save the results of an already finished job.
    Fetch {
        job_id: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = resolve_config(&args)?;
    info!(server_url = %config.server_url, "using backend");
    let api: Arc<dyn JobApi> = Arc::new(HttpJobApi::new(config.server_url.clone())?);

    match args.command {
        Command::Run { image, out_dir } => run(api, &config, &image, &out_dir).await,
        Command::Status { job_id } => status(api.as_ref(), &JobId::new(job_id)).await,
        Command::Fetch { job_id, out_dir } => {
            fetch(api.as_ref(), &JobId::new(job_id), &out_dir).await
        }
    }
}

fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = &args.server_url {
        config.server_url = url.clone();
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(secs) = args.max_poll_secs {
        config.max_poll_duration = limit_from_secs(secs);
    }
    Ok(config)
}

async fn run(
    api: Arc<dyn JobApi>,
    config: &ClientConfig,
    image: &Path,
    out_dir: &Path,
) -> Result<()> {
    let controller = UploadFlowController::new(
        api,
        config.poll_settings(),
        Notifier::new(config.toast_ttl),
    );
    let printer = tokio::spawn(print_events(controller.subscribe()));

    let outcome = drive(&controller, image, out_dir).await;
    controller.shutdown().await;
    // Dropping the last sender closes the channel once the queue is drained.
    drop(controller);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer stopped abnormally");
    }
    outcome
}

async fn drive(controller: &Arc<UploadFlowController>, image: &Path, out_dir: &Path) -> Result<()> {
    controller
        .accept_path(image)
        .await
        .with_context(|| format!("cannot use '{}'", image.display()))?;

    let Some(job_id) = controller.submit().await? else {
        bail!("no image selected");
    };
    println!("job {job_id}");

    controller.wait_idle().await;
    let view = controller.view().await;
    if view.step != FlowStep::Result {
        let reason = view
            .toast
            .map(|toast| toast.message)
            .unwrap_or(view.status_text);
        bail!("job {job_id} did not produce a diagram: {reason}");
    }

    let source = view
        .diagram_source
        .context("result step reached without diagram source")?;
    let mermaid_path = write_output(out_dir, MERMAID_FILE, source.as_bytes()).await?;
    println!("saved {}", mermaid_path.display());
    if let Some(rendered) = &view.rendered {
        println!("diagram type: {}", rendered.kind);
    }
    if let Some(label) = view.png_status {
        println!("server render: {label}");
    }

    match controller.download_png().await {
        Some(link) => {
            let bytes = controller.api().fetch_png(&link.job_id).await?;
            let png_path = write_output(out_dir, PNG_FILE, &bytes).await?;
            println!("saved {}", png_path.display());
        }
        None => println!("no server-rendered PNG for this job"),
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<FlowEvent>) {
    loop {
        match events.recv().await {
            Ok(FlowEvent::StatusText(text)) => println!("{text}"),
            Ok(FlowEvent::Notified(notification)) => eprintln!("! {}", notification.message),
            Ok(FlowEvent::FileAccepted { file_name }) => println!("selected {file_name}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn status(api: &dyn JobApi, job_id: &JobId) -> Result<()> {
    let response = api.fetch_status(job_id).await?;
    let status = JobStatus::classify(&response.status);
    match response.updated_at {
        Some(at) => println!("{job_id}: {} (updated {at})", status.display_label()),
        None => println!("{job_id}: {}", status.display_label()),
    }
    Ok(())
}

async fn fetch(api: &dyn JobApi, job_id: &JobId, out_dir: &Path) -> Result<()> {
    let source = api.fetch_mermaid(job_id).await?;
    let mermaid_path = write_output(out_dir, MERMAID_FILE, source.as_bytes()).await?;
    println!("saved {}", mermaid_path.display());

    if api.probe_png(job_id).await {
        let bytes = api.fetch_png(job_id).await?;
        let png_path = write_output(out_dir, PNG_FILE, &bytes).await?;
        println!("saved {}", png_path.display());
    } else {
        println!("no server-rendered PNG for this job");
    }
    Ok(())
}

async fn write_output(out_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("cannot create '{}'", out_dir.display()))?;
    let path = out_dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("cannot write '{}'", path.display()))?;
    Ok(path)
}
