// Inspection tool: dump a DRM device's pipes, planes, connectors and
// modes. Linux-only; on other platforms it just says so.

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("kms-print needs a Linux DRM device");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    native::run()
}

#[cfg(target_os = "linux")]
mod native {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use clap::Parser;
    use prism_kms::{ConnectorStatus, Display};
    use prism_uapi::DrmDevice;

    #[derive(Debug, Parser)]
    #[command(about = "Dump KMS pipes, planes and connectors of a DRM device")]
    pub struct Args {
        /// Card node to open (default: first usable /dev/dri/cardN).
        #[arg(long)]
        device: Option<PathBuf>,

        /// Also list every supported (format, modifier) pair per plane.
        #[arg(long)]
        formats: bool,
    }

    pub fn run() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let args = Args::parse();
        let dev = match &args.device {
            Some(path) => DrmDevice::open(path)?,
            None => DrmDevice::open_first_card()?,
        };
        let path = dev.path().display().to_string();
        let display = Display::open(dev).context("initializing display")?;

        println!("{path}: {} pipe(s), atomic: {}", display.n_pipes(), display.is_atomic());

        for pipe in display.pipes() {
            println!("pipe {} (crtc {}):", pipe.name(), pipe.crtc_id());
            for plane in pipe.planes() {
                let formats: BTreeSet<String> = plane
                    .formats()
                    .iter()
                    .map(|(f, _)| f.to_string())
                    .collect();
                println!(
                    "  plane {} [{}] id {} ({} format(s))",
                    plane.index(),
                    plane.plane_type().name(),
                    plane.plane_id(),
                    formats.len(),
                );
                if args.formats {
                    for (format, modifier) in plane.formats() {
                        println!("    {format} {modifier:?}");
                    }
                }
            }
        }

        for output in display.outputs() {
            let status = match output.info().connection {
                ConnectorStatus::Connected => "connected",
                ConnectorStatus::Disconnected => "disconnected",
                ConnectorStatus::Unknown => "unknown",
            };
            println!("{} ({status}):", output.name());
            for mode in &output.info().modes {
                println!(
                    "  {:>12} {:4}x{:<4} {:6.2} Hz clock {} kHz{}",
                    mode.name,
                    mode.hdisplay,
                    mode.vdisplay,
                    mode.calculated_vrefresh(),
                    mode.clock_khz,
                    if mode.is_preferred() { " (preferred)" } else { "" },
                );
            }
        }

        Ok(())
    }
}
