//! orbitd — Orbit proximity daemon.

use anyhow::Result;

use orbit_core::config::OrbitConfig;
use orbit_core::signal::approx_distance_m;
use orbitd::link::{mock, MockBehavior, MockRadio, UdpLink};
use orbitd::{ProximityHandle, StateChange, TransportEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = OrbitConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = OrbitConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        OrbitConfig::default()
    });

    let demo = std::env::args().any(|arg| arg == "--demo");
    let local_name = config.display_name();
    tracing::info!(name = %local_name, demo, "orbitd starting");

    // Radio link: the LAN by default, the scripted mock under --demo.
    let port = if demo {
        let (port, handle) = MockRadio::spawn(MockBehavior::default());
        mock::spawn_demo_driver(handle);
        port
    } else {
        UdpLink::spawn(&config.radio)?
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Engine ───────────────────────────────────────────────────────────────
    let (engine, facade) = TransportEngine::new(&config, port, shutdown_tx.subscribe());
    let engine_task = tokio::spawn(async move {
        if let Err(e) = engine.run().await {
            tracing::error!(error = %e, "transport engine failed");
        }
    });

    // Log every state transition until shutdown.
    let reference_power = config.tuning.reference_power_dbm;
    let path_loss = config.tuning.path_loss_exponent;
    let mut updates = facade.updates();
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_change = updates.recv() => match maybe_change {
                Some(change) => log_change(&facade, &change, reference_power, path_loss),
                None => break,
            },
        }
    }

    engine_task.await.ok();
    Ok(())
}

fn log_change(
    facade: &ProximityHandle,
    change: &StateChange,
    reference_power: f64,
    path_loss: f64,
) {
    match change {
        StateChange::RadioStateChanged { state } => {
            tracing::info!(%state, "radio");
        }
        StateChange::PeerObserved { identity, smoothed } => {
            let distance = approx_distance_m(*smoothed, reference_power, path_loss);
            tracing::info!(
                identity = %identity,
                signal_dbm = *smoothed,
                approx_m = distance,
                stable_id = %facade.stable_id(identity),
                "peer seen"
            );
        }
        StateChange::PeerRemoved { identity } => {
            tracing::info!(identity = %identity, "peer gone");
        }
        StateChange::PhaseChanged { identity, phase } => {
            tracing::info!(identity = %identity, %phase, "phase");
        }
        StateChange::ReadyChanged { identity, ready } => {
            tracing::info!(identity = %identity, ready, "ready set");
        }
        StateChange::PingedChanged { identity, pinged } => {
            tracing::info!(identity = %identity, pinged, "pinged set");
        }
    }
}
