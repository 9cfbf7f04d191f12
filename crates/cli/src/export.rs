//! `subtitler export`: submit, follow progress, download.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use subtitler_core::{
    CleanupTarget, ExportConfig, ExportSnapshot, ExportStatus, ExportStore, ExportTransport,
    HttpTransport, SubmissionError, TransportUnloadSignal,
};
use subtitler_types::RenderRequest;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for each cleanup call before giving up on exit.
const CLEANUP_GRACE: Duration = Duration::from_secs(2);

type PendingSubmit = JoinHandle<Result<String, SubmissionError>>;

pub async fn run(config: ExportConfig, request: RenderRequest, out: &Path, keep: bool) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(&config)?);
    let store = ExportStore::new(transport.clone(), config.poll.clone());
    let unload = TransportUnloadSignal::new(transport.clone(), tokio::runtime::Handle::current());
    let mut sub = store.subscribe();
    let upload_id = request.upload_id.clone();

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner} [{bar:40}] {pos:>3}% {msg}")
            .context("progress bar template")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("submitting");

    // On its own task so an interrupt does not drop a request the service
    // may already be acting on.
    let mut submit = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.submit(request).await }
    });
    let token = tokio::select! {
        joined = &mut submit => joined.context("submit task failed")??,
        _ = tokio::signal::ctrl_c() => {
            pb.abandon_with_message("interrupted");
            interrupt(&store, &unload, &upload_id, Some(submit)).await;
            bail!("interrupted before the export was accepted");
        }
    };
    info!(%token, "export accepted");

    let outcome = loop {
        tokio::select! {
            update = sub.next() => {
                let Some(snapshot) = update else {
                    bail!("export store closed unexpectedly");
                };
                render(&pb, &snapshot);
                if snapshot.status.is_terminal() {
                    break snapshot;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                pb.abandon_with_message("interrupted");
                interrupt(&store, &unload, &upload_id, None).await;
                bail!("interrupted, render job released");
            }
        }
    };

    if outcome.status == ExportStatus::Error {
        pb.abandon_with_message("failed");
        if !keep {
            let mut targets = vec![CleanupTarget::Upload(upload_id)];
            targets.extend(outcome.token.map(CleanupTarget::Export));
            release(&*transport, &targets).await;
        }
        let message = outcome.error.unwrap_or_else(|| "Export failed".into());
        bail!("{message}");
    }
    pb.finish_with_message("rendered");

    let artifact = store
        .artifact()
        .context("export finished without an artifact")?;
    let bytes = transport.download(&artifact.token).await?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    eprintln!(
        "  \u{2713} Saved {} ({} bytes)",
        out.display(),
        bytes.len()
    );

    if !keep {
        release(
            &*transport,
            &[CleanupTarget::Export(artifact.token), CleanupTarget::Upload(upload_id)],
        )
        .await;
    }
    Ok(())
}

fn render(pb: &ProgressBar, snapshot: &ExportSnapshot) {
    match snapshot.status {
        ExportStatus::Starting => pb.set_message("submitting"),
        ExportStatus::Exporting => {
            pb.set_position(u64::from(snapshot.progress));
            let msg = match (snapshot.retry_count, snapshot.time_remaining) {
                (n, _) if n > 0 => format!("reconnecting (attempt {n})"),
                (_, Some(secs)) => format!("~{secs}s left"),
                _ => "rendering".to_string(),
            };
            pb.set_message(msg);
        }
        ExportStatus::Complete => pb.set_position(100),
        ExportStatus::Idle | ExportStatus::Error => {}
    }
}

/// Abandon the export on Ctrl-C: the process is the page here, and it is
/// about to unload.
///
/// A submission still in flight gets a grace period to land so the job it
/// creates can be released too. Everything goes out through the store's
/// cleanup registry, so nothing is released twice.
async fn interrupt(
    store: &ExportStore,
    unload: &TransportUnloadSignal,
    upload_id: &str,
    pending: Option<PendingSubmit>,
) {
    store.stop_polling();
    if let Some(mut pending) = pending {
        match tokio::time::timeout(CLEANUP_GRACE, &mut pending).await {
            Ok(Ok(Ok(token))) => debug!(%token, "submission landed after interrupt"),
            Ok(Ok(Err(e))) => debug!(error = %e, "submission failed after interrupt"),
            Ok(Err(e)) => warn!(error = %e, "submit task failed"),
            Err(_) => {
                warn!("submission still pending, abandoning it");
                pending.abort();
            }
        }
    }

    let cleanup = store.cleanup();
    let mut targets = vec![CleanupTarget::Upload(upload_id.to_string())];
    targets.extend(store.snapshot().token.map(CleanupTarget::Export));
    for target in targets {
        cleanup.release_on_unload(target, unload);
    }
    unload.flush(CLEANUP_GRACE).await;
}

/// Release server resources before the process exits. Unlike the store's
/// fire-and-forget cleanup, these calls are awaited so they are not dropped
/// with the runtime.
pub async fn release(transport: &dyn ExportTransport, targets: &[CleanupTarget]) {
    for target in targets {
        match tokio::time::timeout(CLEANUP_GRACE, transport.cleanup(target)).await {
            Ok(Ok(())) => info!(%target, "released"),
            Ok(Err(e)) => warn!(%target, error = %e, "cleanup failed"),
            Err(_) => warn!(%target, "cleanup timed out"),
        }
    }
}
