//! Headless calibration agent.
//!
//! Wires one pattern source (PGen emulation, calibration feed, control
//! channel, or a built-in generator pattern) to the shared pattern mailbox
//! and drains it the way an external renderer would, logging each batch.
//! Optionally holds an SSAP link to the TV so mode changes surface there.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pattern_core::{generator, HdrMetadata, PatternState};
use protocols::control::{spawn_control_server, ControlConfig, ControlObserver};
use protocols::feed::{spawn_feed_client, FeedConfig};
use protocols::pgen::{spawn_pgen_server, PGenConfig};
use tracing::info;
use tv_link::{SsapClient, SsapObserver, TvController, TvLinkStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless TV calibration pattern agent")]
struct Args {
    #[command(subcommand)]
    source: Source,

    #[arg(long, help = "TV address for SSAP picture control")]
    tv: Option<String>,

    #[arg(long, help = "Use TLS (port 3001) for the TV connection")]
    tv_secure: bool,

    #[arg(
        long,
        default_value = "50",
        help = "Consumer poll interval in milliseconds"
    )]
    poll_interval: u64,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Present this device as a PGenerator to calibration software
    Pgen {
        #[arg(long, help = "Switch the output to HDR")]
        hdr: bool,

        #[arg(long, value_name = "R,G,B", help = "Idle pattern as 8-bit codes")]
        passive: Option<String>,

        #[arg(long, default_value = "1977", help = "UDP discovery port")]
        udp_port: u16,

        #[arg(long, default_value = "85", help = "TCP command port")]
        tcp_port: u16,
    },
    /// Connect out to grading software streaming XML patch requests
    Feed {
        /// Feed host to connect to
        host: String,

        #[arg(long, default_value = "20002")]
        port: u16,

        #[arg(long, help = "Switch the output to HDR")]
        hdr: bool,

        #[arg(
            long,
            default_value = "0.0",
            help = "Render every patch as a centered window of this percent (0 = honor the requested geometry)"
        )]
        window_override: f32,
    },
    /// Serve the JSON control channel for companion tooling
    Control {
        #[arg(long, default_value = "5742")]
        port: u16,

        #[arg(long, default_value = "cal-agent", help = "Device name in the hello event")]
        device_name: String,
    },
    /// Publish one built-in pattern and idle
    Pattern {
        /// Pattern name
        #[arg(value_parser = ["pluge", "bars"])]
        name: String,

        #[arg(long, help = "HDR variant where the pattern has one")]
        hdr: bool,

        #[arg(long, help = "10-bit code values")]
        ten_bit: bool,

        #[arg(long, help = "Limited-range variant of the bars pattern")]
        limited: bool,
    },
}

/// Forwards control-channel side effects to the TV as toasts.
struct TvNotifier {
    controller: TvController,
}

impl ControlObserver for TvNotifier {
    fn mode_changed(&self, hdr: bool, bit_depth: u8) {
        info!("mode changed: {bit_depth}-bit {}", if hdr { "HDR" } else { "SDR" });
    }

    fn hdr_metadata(&self, metadata: HdrMetadata) {
        info!(
            "hdr metadata: maxCLL={} maxFALL={} maxDML={}",
            metadata.max_cll, metadata.max_fall, metadata.max_dml
        );
    }

    fn status(&self, message: &str) {
        self.controller.show_toast(message, Arc::new(|_| {}));
    }
}

struct LogObserver;

impl ControlObserver for LogObserver {
    fn status(&self, message: &str) {
        info!("{message}");
    }
}

fn parse_passive(passive: &str) -> Result<[i32; 3]> {
    let codes: Vec<i32> = passive
        .split(',')
        .map(|part| part.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid passive pattern {passive:?}"))?;
    if codes.len() != 3 {
        bail!("passive pattern needs exactly three components, got {}", codes.len());
    }
    Ok([codes[0], codes[1], codes[2]])
}

/// Mirrors TV connection events into the shared state's status field.
struct TvStatus {
    state: Arc<PatternState>,
}

impl SsapObserver for TvStatus {
    fn status(&self, message: &str) {
        self.state.set_connection_status(format!("TV: {message}"));
    }

    fn pairing_required(&self) {
        info!("accept the pairing prompt on the TV");
    }
}

fn connect_tv(host: &str, secure: bool, state: &Arc<PatternState>) -> Result<TvController> {
    let store = TvLinkStore::new().context("tv link storage")?;
    let observer = Arc::new(TvStatus {
        state: Arc::clone(state),
    });
    let client = Arc::new(SsapClient::new(store, observer));
    client
        .connect(host, secure)
        .with_context(|| format!("connect to TV at {host}"))?;
    Ok(TvController::new(client))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let state = Arc::new(PatternState::new());

    // The controller must outlive the match below so the SSAP link stays up
    // for every source, not just the control channel.
    let tv = match &args.tv {
        Some(host) => Some(connect_tv(host, args.tv_secure, &state)?),
        None => None,
    };

    // Keep the source handle alive for the lifetime of the loop.
    let _source: Box<dyn std::any::Any> = match args.source {
        Source::Pgen {
            hdr,
            passive,
            udp_port,
            tcp_port,
        } => {
            let config = PGenConfig {
                udp_port,
                tcp_port,
                hdr,
                passive: passive.as_deref().map(parse_passive).transpose()?,
            };
            let handle =
                spawn_pgen_server(config, Arc::clone(&state)).context("start PGen server")?;
            info!("PGen server on tcp port {}", handle.tcp_port());
            Box::new(handle)
        }
        Source::Feed {
            host,
            port,
            hdr,
            window_override,
        } => {
            let config = FeedConfig {
                host,
                port,
                hdr,
                window_override,
            };
            let handle = spawn_feed_client(config, Arc::clone(&state))
                .context("connect to calibration feed")?;
            Box::new(handle)
        }
        Source::Control { port, device_name } => {
            let config = ControlConfig { port, device_name };
            let observer: Arc<dyn ControlObserver> = match &tv {
                Some(controller) => Arc::new(TvNotifier {
                    controller: controller.clone(),
                }),
                None => Arc::new(LogObserver),
            };
            let handle = spawn_control_server(config, Arc::clone(&state), observer)
                .context("start control channel")?;
            info!("control channel on port {}", handle.port());
            Box::new(handle)
        }
        Source::Pattern {
            name,
            hdr,
            ten_bit,
            limited,
        } => {
            let commands = match name.as_str() {
                "pluge" => generator::pluge(hdr, ten_bit),
                "bars" => generator::bars(limited),
                other => bail!("unknown pattern {other:?}"),
            };
            state.set_mode(if ten_bit { 10 } else { 8 }, hdr);
            state.set_commands(commands);
            Box::new(())
        }
    };

    consume(&state, Duration::from_millis(args.poll_interval));
    Ok(())
}

/// Stand-in for the external renderer: acknowledge each batch and log it.
fn consume(state: &Arc<PatternState>, poll_interval: Duration) {
    info!("consumer loop running; ctrl-c to exit");
    loop {
        if let Some((bit_depth, hdr)) = state.take_mode_change() {
            info!(
                "output mode: {bit_depth}-bit {}",
                if hdr { "HDR" } else { "SDR" }
            );
        }
        if state.is_pending() {
            let commands = state.commands();
            info!(
                "batch: {} command(s), status {:?}",
                commands.len(),
                state.connection_status()
            );
            state.clear_pending();
        }
        std::thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tv_flag_applies_to_every_source() {
        let cases: &[&[&str]] = &[
            &["cal-agent", "--tv", "10.0.0.5", "pgen"],
            &["cal-agent", "--tv", "10.0.0.5", "feed", "10.0.0.9"],
            &["cal-agent", "--tv", "10.0.0.5", "control"],
            &["cal-agent", "--tv", "10.0.0.5", "pattern", "pluge"],
        ];
        for argv in cases {
            let args = Args::try_parse_from(argv.iter()).unwrap();
            assert_eq!(args.tv.as_deref(), Some("10.0.0.5"));
        }
    }

    #[test]
    fn test_parse_passive() {
        assert_eq!(parse_passive("16,16,16").unwrap(), [16, 16, 16]);
        assert_eq!(parse_passive(" 255 , 0 , 0 ").unwrap(), [255, 0, 0]);
        assert!(parse_passive("1,2").is_err());
        assert!(parse_passive("a,b,c").is_err());
    }
}
