//! gifendec CLI - split GIFs into PNG frames and compose them back.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gifendec::{quantize, DecodeOptions, EncodeOptions, GifMeta};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gifendec")]
#[command(version)]
#[command(about = "Split GIF animations into PNG frames and compose them back")]
struct Args {
    /// Log every step
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one PNG per frame and print the frame list as JSON
    Decode {
        /// GIF file to read
        src: PathBuf,
        /// Directory for the frames
        dst_dir: PathBuf,
        /// Write full screen images with disposal applied
        #[arg(long)]
        coalesce: bool,
    },
    /// Compose the frames of a JSON frame list into a GIF
    Encode {
        /// Frame list as printed by `decode`
        meta: PathBuf,
        /// GIF file to write
        dst: PathBuf,
        /// Loop forever
        #[arg(long)]
        infinite: bool,
        /// 1 (best quality) to 10 (fastest)
        #[arg(long, default_value_t = quantize::DEFAULT_SPEED)]
        speed: u8,
        /// Store this URI in a comment extension
        #[arg(long)]
        uri: Option<String>,
        /// Diffuse quantization errors
        #[arg(long)]
        dither: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match args.command {
        Command::Decode {
            src,
            dst_dir,
            coalesce,
        } => {
            let mut options = DecodeOptions::new();
            options.set_coalesce(coalesce);
            let meta = gifendec::decode_with_options(&src, &dst_dir, &options)?;
            info!("{} frames written to {}", meta.frames.len(), dst_dir.display());
            println!("{}", meta.to_json()?);
        }
        Command::Encode {
            meta,
            dst,
            infinite,
            speed,
            uri,
            dither,
        } => {
            let json = fs::read_to_string(&meta)
                .with_context(|| format!("failed to read {}", meta.display()))?;
            let meta = GifMeta::from_json(&json)?;
            let mut options = EncodeOptions::new();
            options
                .set_infinite(infinite)
                .set_speed(speed)
                .set_dither(dither)
                .set_comment(uri);
            let dst = gifendec::encode_with_options(&dst, &meta, &options)?;
            info!("{} frames written to {}", meta.frames.len(), dst.display());
        }
    }
    Ok(())
}
