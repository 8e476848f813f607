//! Webcam-capture binary for exercising a live capture session.

use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use webcam_capture::{
    dimensions, CaptureController, CaptureError, CaptureMode, MemoryRegistry, V4l2Provider,
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> webcam_capture::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    for entry in dimensions::list_devices() {
        println!("Device: {entry}");
    }

    let spec = std::env::args().nth(1);
    let dims = dimensions::resolve(spec.as_deref());
    println!("Capture size: {dims}");

    let controller = CaptureController::new(
        Some(V4l2Provider::new(0)),
        MemoryRegistry::new(),
        dims,
        CaptureMode::Direct,
    );

    let (exit_tx, exit_rx) = watch::channel(false);
    controller.register_exit_hook(exit_rx);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = exit_tx.send(true);
    });

    controller.start();
    if !controller.wait_available(Duration::from_secs(5)).await {
        return Err(CaptureError::NotAvailable);
    }

    let (center_x, center_y) = (dims.width / 2, dims.height / 2);
    for _ in 0..30 {
        controller.read().await?;
        println!(
            "Center pixel ({center_x}, {center_y}): {:#010X}",
            controller.get(center_x, center_y)
        );
        tokio::time::sleep(Duration::from_millis(33)).await;
    }

    controller.release().await;
    Ok(())
}
