//! Pull an RTMP stream into an FLV file
//!
//! Run with:
//! cargo run --example puller -- "rtmp://localhost/live/test_key live=1" out.flv
//!
//! The first argument is a URL optionally followed by `key=value` options.
//! Without an output path the FLV bytes go to stdout. Ctrl+C stops the pull.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use rtmp_client::{ClientConfig, RtmpPuller};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout can carry the stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_client=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let line = args.next().unwrap_or_else(|| {
        eprintln!("Usage: puller \"<rtmp_url> [key=value ...]\" [output.flv]");
        eprintln!("Example: puller \"rtmp://localhost/live/test_key live=1\" out.flv");
        std::process::exit(1);
    });

    let config = ClientConfig::parse(&line)?;
    let output: Box<dyn AsyncWrite + Unpin> = match args.next() {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let mut puller = RtmpPuller::open(config).await?;
    eprintln!("Playing {}", puller.connector().link().playpath);

    let close = puller.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping...");
            close.close();
        }
    });

    let total = pull(&mut puller, output).await;
    puller.close().await?;

    let stats = puller.stats();
    eprintln!(
        "Done: {} bytes written, {} video ({} keyframes), {} audio, {} dropped",
        total?, stats.video_frames, stats.keyframes, stats.audio_frames, stats.dropped_frames
    );
    Ok(())
}

async fn pull(
    puller: &mut RtmpPuller,
    mut output: Box<dyn AsyncWrite + Unpin>,
) -> Result<u64, Box<dyn std::error::Error>> {
    let mut buf = BytesMut::with_capacity(64 * 1024);
    let mut total = 0u64;

    loop {
        buf.clear();
        let n = puller.read_flv(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf).await?;
        total += n as u64;
    }
    output.flush().await?;
    Ok(total)
}
