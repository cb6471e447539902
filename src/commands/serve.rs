use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use droidpool::config::Config;
use droidpool::device::AdbBridge;
use droidpool::server::OrchestratorServer;

use super::inspector_for;

/// Command-line overrides for `serve`
#[derive(Debug, Default)]
pub struct ServeParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub hub_url: Option<String>,
    pub app_folder: Option<PathBuf>,
    pub apps: Vec<PathBuf>,
}

impl ServeParams {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.hub_url {
            config.hub.url = Some(url);
        }
        if let Some(folder) = self.app_folder {
            config.apps.folder = Some(folder);
        }
        config.apps.paths.extend(self.apps);
    }
}

/// Run the orchestrator until Ctrl+C
pub async fn serve(mut config: Config, params: ServeParams) -> Result<()> {
    params.apply(&mut config);

    let bridge = Arc::new(AdbBridge::new(config.bridge_config()));
    let inspector = Arc::new(inspector_for(&config));

    let server = OrchestratorServer::new(config, bridge, inspector)
        .context("Failed to create orchestrator")?;

    println!("{}", server.info().display());
    println!();
    println!("WebDriver Endpoints:");
    println!("  GET    /wd/hub/status                   - Node status");
    println!("  GET    /wd/hub/sessions                 - List sessions");
    println!("  POST   /wd/hub/session                  - Create session");
    println!("  GET    /wd/hub/session/:id              - Session capabilities");
    println!("  DELETE /wd/hub/session/:id              - Delete session");
    println!("  *      /wd/hub/session/:id/...          - Forwarded to device");
    println!("  GET    /wd/hub/devices                  - Device pool");
    println!("  POST   /wd/hub/devices/:id/recover      - Recover unhealthy device");
    println!("  GET    /health                          - Health check");
    println!("  GET    /metrics                         - Prometheus metrics");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Orchestrator stopped.");
    Ok(())
}
