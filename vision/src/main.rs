use pixel_diff_common::config::{Config, DiffAttributes};
use pixel_diff_vision::camera::cameras_from_config;
use pixel_diff_vision::service::DiffVision;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    // Config::load already validated the attributes.
    let input_camera = match DiffAttributes::from_attributes(&config.service.attributes) {
        Ok(attrs) => attrs.input_camera,
        Err(e) => {
            error!(error = %e, "invalid service attributes");
            std::process::exit(1);
        }
    };

    info!(
        service = config.service.name,
        input_camera,
        fps = config.watch.fps,
        "starting pixel-diff watcher"
    );

    let deps = match cameras_from_config(&config.cameras) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to set up cameras");
            std::process::exit(1);
        }
    };

    let service =
        match DiffVision::from_config(&config.service.name, &config.service.attributes, &deps)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to configure vision service");
                std::process::exit(1);
            }
        };

    let interval = match Duration::try_from_secs_f64(1.0 / config.watch.fps) {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, fps = config.watch.fps, "invalid watch rate");
            std::process::exit(1);
        }
    };
    run_watch_loop(&service, &input_camera, interval).await;
}

/// Poll the input camera until Ctrl-C, logging every significant change.
async fn run_watch_loop(service: &DiffVision, camera: &str, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut total: u64 = 0;
    let mut changes: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(total, changes, "shutting down watcher");
                break;
            }
            _ = ticker.tick() => {}
        }

        total += 1;
        match service.detections_from_camera(camera).await {
            Ok(detections) if !detections.is_empty() => {
                changes += 1;
                let memories = service.memory_len().await;
                for d in &detections {
                    info!(
                        camera,
                        label = d.label,
                        confidence = d.confidence,
                        memories,
                        changes,
                        "significant change detected"
                    );
                }
            }
            Ok(_) => {
                if total % 100 == 0 {
                    debug!(total, changes, "frames evaluated");
                }
            }
            Err(e) => {
                warn!(error = %e, camera, "failed to evaluate frame, skipping");
            }
        }
    }
}
