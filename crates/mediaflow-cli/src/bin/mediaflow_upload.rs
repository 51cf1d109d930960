use anyhow::{Context, Result};
use clap::Parser;
use mediaflow_cli::{part_ranges, ApiClient};
use mediaflow_core::models::UploadedPart;
use mediaflow_core::MediaStatus;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "mediaflow-upload")]
#[command(about = "Upload a video, trigger transcoding and wait for the result")]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Files at least this large use a multipart upload
    #[arg(long, default_value = "100")]
    multipart_threshold_mb: u64,

    /// Return after completion instead of waiting for a terminal status
    #[arg(long)]
    no_wait: bool,

    /// Seconds between status polls
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "3600")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    mediaflow_cli::init_tracing();

    let args = Args::parse();
    let client = ApiClient::from_env()?;

    let size = tokio::fs::metadata(&args.file)
        .await
        .with_context(|| format!("Failed to stat file: {}", args.file.display()))?
        .len();
    let extension = args.file.extension().and_then(|e| e.to_str());

    let (id, multipart) = if size >= args.multipart_threshold_mb * 1024 * 1024 {
        upload_multipart(&client, &args.file, size, extension).await?
    } else {
        let data = tokio::fs::read(&args.file)
            .await
            .with_context(|| format!("Failed to read file: {}", args.file.display()))?;
        let plan = client.init_upload(extension).await?;
        println!("Media {} created, uploading {} bytes", plan.media.id, size);
        client.put_presigned(&plan.upload_url, data).await?;
        (plan.media.id, None)
    };

    let completed = client.complete_upload(id, multipart).await?;
    println!("Upload complete, status {}", completed.status.as_str());

    if args.no_wait {
        return Ok(());
    }

    let status = wait_for_terminal(
        &client,
        id,
        Duration::from_secs(args.poll_interval.max(1)),
        Duration::from_secs(args.timeout),
    )
    .await?;
    println!("Media {} finished: {}", id, status.as_str());

    if status == MediaStatus::Failed {
        anyhow::bail!("Transcoding failed for media {}", id);
    }
    Ok(())
}

async fn upload_multipart(
    client: &ApiClient,
    path: &Path,
    size: u64,
    extension: Option<&str>,
) -> Result<(Uuid, Option<(String, Vec<UploadedPart>)>)> {
    let plan = client.init_multipart_upload(size, extension).await?;
    let ranges = part_ranges(size, plan.part_size);
    if ranges.len() != plan.part_urls.len() {
        anyhow::bail!(
            "Server planned {} parts but the file splits into {}",
            plan.part_urls.len(),
            ranges.len()
        );
    }
    println!(
        "Media {} created, uploading {} bytes in {} parts",
        plan.media_id,
        size,
        ranges.len()
    );

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut parts = Vec::with_capacity(ranges.len());

    for (index, (range, url)) in ranges.iter().zip(&plan.part_urls).enumerate() {
        let part_number = index as u32 + 1;
        let mut buffer = vec![0u8; (range.end - range.start) as usize];
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buffer)
            .await
            .with_context(|| format!("Failed to read part {}", part_number))?;

        let etag = client
            .put_presigned(url, buffer)
            .await
            .with_context(|| format!("Failed to upload part {}", part_number))?;
        tracing::debug!(part_number, etag = %etag, "Part uploaded");
        parts.push(UploadedPart { part_number, etag });
    }

    Ok((plan.media_id, Some((plan.upload_id, parts))))
}

async fn wait_for_terminal(
    client: &ApiClient,
    id: Uuid,
    interval: Duration,
    timeout: Duration,
) -> Result<MediaStatus> {
    let started = Instant::now();
    let mut last = None;
    loop {
        let media = client.get_media(id).await?;
        if last != Some(media.status) {
            println!("Status: {}", media.status.as_str());
            last = Some(media.status);
        }
        if media.status.is_terminal() {
            return Ok(media.status);
        }
        if started.elapsed() >= timeout {
            anyhow::bail!(
                "Gave up waiting for media {} after {}s",
                id,
                timeout.as_secs()
            );
        }
        tokio::time::sleep(interval).await;
    }
}
