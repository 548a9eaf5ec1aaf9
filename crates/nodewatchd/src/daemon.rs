//! Run modes: the long-lived daemon and the single-cycle check.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use nodewatch_dashboard::{ReportGenerator, StatusState, status_router};

use crate::wiring::Components;

/// Serve the status page on the already bound `listener` and, unless
/// `dry_run`, drive check cycles until interrupted.
pub async fn run(
    components: Components,
    listener: TcpListener,
    dry_run: bool,
    startup_delay: Duration,
) -> anyhow::Result<()> {
    info!(
        nodes = components.registry.len(),
        dry_run,
        "nodewatch daemon starting"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Check loop ─────────────────────────────────────────────

    let monitor_handle = if dry_run {
        info!("dry run, probes disabled");
        None
    } else {
        let orchestrator = components.orchestrator();
        Some(tokio::spawn(orchestrator.run(shutdown_rx, startup_delay)))
    };

    // ── Status server ──────────────────────────────────────────

    let router = status_router(StatusState {
        registry: components.registry.clone(),
    });
    info!(addr = %listener.local_addr()?, "status server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for the cycle in flight and any queued retries.
    if let Some(handle) = monitor_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "check loop ended abnormally");
        }
    }

    info!("nodewatch daemon stopped");
    Ok(())
}

/// One check cycle, queued retries run straight away, then the text report
/// on stdout.
pub async fn once(components: Components) -> anyhow::Result<()> {
    let orchestrator = components.orchestrator();
    if let Some(summary) = orchestrator.run_cycle().await {
        info!(
            probed = summary.probed,
            failed = summary.failed,
            escalated = summary.escalated,
            "check cycle finished"
        );
    }
    orchestrator.retries().shutdown().await;

    let report = ReportGenerator::render_text(&components.registry.all_nodes());
    if report.is_empty() {
        info!("no nodes in error");
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
