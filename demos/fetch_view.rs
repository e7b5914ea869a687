use clap::Parser;
use jpipclient::config::JpipConfig;
use jpipclient::manager::ImageManager;
use jpipclient::session::session_state::{AuxTransport, StreamKind};
use tracing::{info, Level};

/// Fetches one view of a remote JPEG2000 image over JPIP, runs it through the
/// decode daemon, and optionally writes the raster to disk as binary PNM.
#[derive(Parser)]
struct Args {
    /// JPIP server endpoint, e.g. http://localhost:8080/jpip
    server: String,
    /// document to view, e.g. scan.jp2
    target: String,

    /// decode daemon address
    #[clap(long, default_value = "127.0.0.1:9100")]
    daemon: String,

    #[clap(long, default_value_t = 512)]
    width: u32,
    #[clap(long, default_value_t = 512)]
    height: u32,

    /// ask the server for an auxiliary TCP channel instead of chunked http
    #[clap(long, default_value_t = false)]
    tcp_aux: bool,

    /// prefer tile-part streams over precinct streams
    #[clap(long, default_value_t = false)]
    jpt: bool,

    /// write the decoded raster to this file
    #[clap(short, long)]
    out: Option<std::path::PathBuf>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = JpipConfig::new(args.daemon);
    config.stream_kind_preference = if args.jpt { StreamKind::Jpt } else { StreamKind::Jpp };
    if args.tcp_aux {
        config.aux_transport_preference = AuxTransport::Tcp;
    }

    let mut manager = ImageManager::connect(&args.server, args.target, config)?;

    match manager.open_view((args.width, args.height), None).await? {
        Some(raster) => {
            info!(
                "decoded {}x{} raster with {} channel(s)",
                raster.width, raster.height, raster.channels
            );
            if let Some(path) = &args.out {
                let magic = if raster.is_gray() { "P5" } else { "P6" };
                let mut out = Vec::with_capacity(raster.samples.len() + 32);
                out.extend_from_slice(format!("{}\n{} {}\n255\n", magic, raster.width, raster.height).as_bytes());
                out.extend_from_slice(&raster.samples);
                std::fs::write(path, out)?;
                info!("wrote {}", path.display());
            }
        }
        None => info!("server reported no data for this window"),
    }

    if let Ok((width, height)) = manager.image_size().await {
        info!("full image size: {}x{}", width, height);
    }

    manager.close().await;
    Ok(())
}
