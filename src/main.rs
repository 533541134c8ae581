//! Standalone CLI for trying the guidance client against a simulator
//!
//! Run with: cargo run --features cli --bin compass-cli [ws://host:port/path]
//!
//! Press Enter to ask for the nearest product; Ctrl-D or Ctrl-C quits.

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use ingredient_compass::{CompassPoint, GuidanceConfig, GuidanceView, NativeGuidanceClient};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tracing::{info, warn};
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ingredient_compass=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let mut config = GuidanceConfig::from_env()?;
    if let Some(url) = std::env::args().nth(1) {
        config.endpoint = url;
    }

    info!(url = %config.endpoint, "Starting guidance client");
    let client = NativeGuidanceClient::connect(config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(std::time::Duration::from_millis(200));
    let mut last = GuidanceView::default();

    info!("Press Enter to locate the nearest product");

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(_) => {
                    client.send_fetch_closest()?;
                    info!(status = %client.status(), "Locate request sent");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                let view = client.view();
                if view.status != last.status {
                    info!(status = %view.status, "Status changed");
                }
                if view.last_error != last.last_error {
                    if let Some(error) = &view.last_error {
                        warn!(error = %error, "Transport error");
                    }
                }
                if view.direction() != last.direction() {
                    if let Some(frame) = view.direction() {
                        let heading = frame.heading();
                        info!(
                            heading = format!("{:.1}", heading),
                            towards = %CompassPoint::from_heading(heading),
                            target = frame.target_id.as_deref().unwrap_or("-"),
                            "Direction"
                        );
                    }
                }
                last = view;
            }
        }
    }

    client.dispose();
    info!("Bye");
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn main() {}
