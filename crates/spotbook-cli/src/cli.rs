use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use spotbook_types::{Category, Icon};

#[derive(Parser)]
#[command(
    name = "spotbook",
    about = "Spotbook: save places, photos, and tags",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the document file and the blob tree
    #[arg(long, global = true, env = "SPOTBOOK_DATA_DIR", default_value = ".spotbook")]
    pub data_dir: PathBuf,

    /// Owner id to act as; omitted means an anonymous session
    #[arg(long, global = true, env = "SPOTBOOK_OWNER")]
    pub owner: Option<String>,

    /// TOML file overriding coordinator defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Save a new spot
    Create(CreateArgs),
    /// Change an existing spot
    Edit(EditArgs),
    /// Delete a spot and its photos
    Delete(SpotArgs),
    /// Show one spot
    Show(SpotArgs),
    /// List every spot
    List,
    /// List spots carrying a tag
    Tagged(TaggedArgs),
    /// List or discard orphaned upsert checkpoints
    Checkpoints(CheckpointsArgs),
    /// Check spots, tag index, checkpoints, and blobs for drift
    Fsck,
    /// Rebuild the tag index from the spots
    Reindex,
    /// Convert bare-URL images into storage-path images
    MigrateImages,
}

#[derive(Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub place: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    pub lng: f64,
    #[arg(long)]
    pub category: Category,
    /// Rating icon: favorite, check_circle, thumb_down (or Awesome, Good, Naah)
    #[arg(long)]
    pub icon: Icon,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long, default_value = "")]
    pub notes: String,
    /// Photo file to upload; repeat to attach several, in order
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,
}

#[derive(Args)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub place: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,
    #[arg(long)]
    pub category: Option<Category>,
    #[arg(long)]
    pub icon: Option<Icon>,
    /// Replace the tag set; repeat for several tags
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,
    #[arg(long)]
    pub notes: Option<String>,
    /// Storage path of an existing photo to keep; listing any replaces the
    /// photo set
    #[arg(long = "keep")]
    pub keep: Vec<String>,
    /// Photo file to append after the kept photos
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,
    /// Drop every photo not named with --keep
    #[arg(long)]
    pub clear_images: bool,
}

#[derive(Args)]
pub struct SpotArgs {
    pub id: String,
}

#[derive(Args)]
pub struct TaggedArgs {
    pub tag: String,
}

#[derive(Args)]
pub struct CheckpointsArgs {
    /// Remove the checkpoint with this id
    #[arg(long)]
    pub discard: Option<String>,
}
