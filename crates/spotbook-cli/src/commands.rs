use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use colored::Colorize;
use serde::Serialize;
use spotbook_core::{
    AuditReport, Auditor, CoordinatorConfig, ImageSource, SpotCoordinator, SpotDraft,
};
use spotbook_store::{FsBlobStore, FsDocumentStore};
use spotbook_types::{OwnerId, Session, Spot, SpotId};

use crate::cli::*;

const DOCUMENT_FILE: &str = "documents.json";
const BLOB_DIR: &str = "blobs";

/// Everything a command needs: stores, config, and who is acting.
struct Context {
    coordinator: SpotCoordinator,
    auditor: Auditor,
    session: Session,
    format: OutputFormat,
}

impl Context {
    async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => CoordinatorConfig::load(path)?,
            None => CoordinatorConfig::default(),
        };
        let docs = FsDocumentStore::open(cli.data_dir.join(DOCUMENT_FILE))
            .await
            .with_context(|| format!("opening documents in {}", cli.data_dir.display()))?;
        let blobs = FsBlobStore::open(cli.data_dir.join(BLOB_DIR))
            .await
            .with_context(|| format!("opening blobs in {}", cli.data_dir.display()))?;
        tracing::debug!(data_dir = %cli.data_dir.display(), "stores opened");
        let (docs, blobs) = (Arc::new(docs), Arc::new(blobs));
        let session = match cli.owner.as_deref() {
            Some(owner) => Session::owner(OwnerId::new(owner)?),
            None => Session::Anonymous,
        };
        Ok(Self {
            coordinator: SpotCoordinator::new(docs.clone(), blobs.clone(), config.clone()),
            auditor: Auditor::new(docs, blobs, config),
            session,
            format: cli.format,
        })
    }

    fn owner(&self) -> anyhow::Result<&OwnerId> {
        self.session
            .current_owner()
            .context("no owner given; pass --owner or set SPOTBOOK_OWNER")
    }

    fn json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::open(&cli).await?;
    match cli.command {
        Command::Create(args) => cmd_create(&ctx, args).await,
        Command::Edit(args) => cmd_edit(&ctx, args).await,
        Command::Delete(args) => cmd_delete(&ctx, args).await,
        Command::Show(args) => cmd_show(&ctx, args).await,
        Command::List => cmd_list(&ctx).await,
        Command::Tagged(args) => cmd_tagged(&ctx, args).await,
        Command::Checkpoints(args) => cmd_checkpoints(&ctx, args).await,
        Command::Fsck => cmd_fsck(&ctx).await,
        Command::Reindex => cmd_reindex(&ctx).await,
        Command::MigrateImages => cmd_migrate_images(&ctx).await,
    }
}

// ---------------------------------------------------------------------------
// Spots
// ---------------------------------------------------------------------------

/// A spot with its id, which the persisted body leaves out.
#[derive(Serialize)]
struct SpotView<'a> {
    id: &'a SpotId,
    #[serde(flatten)]
    spot: &'a Spot,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_spot(spot: &Spot) {
    println!("{} {}", spot.name.bold(), format!("({})", spot.id).dimmed());
    println!("  Place: {}", spot.place_id.as_str().cyan());
    println!(
        "  Category: {}  Rating: {} {}",
        spot.category.as_str().yellow(),
        spot.icon.label(),
        format!("[{}]", spot.icon.color()).dimmed()
    );
    println!("  Location: {:.6}, {:.6}", spot.lat, spot.lng);
    if !spot.tags.is_empty() {
        let tags: Vec<&str> = spot.tags.iter().map(String::as_str).collect();
        println!("  Tags: {}", tags.join(", ").green());
    }
    if !spot.notes.is_empty() {
        println!("  Notes: {}", spot.notes);
    }
    for image in &spot.images {
        println!("  Image: {}", image.storage_path.blue());
    }
}

async fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<ImageSource>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        sources.push(ImageSource::upload(read_file(path).await?));
    }
    Ok(sources)
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn spot_id(raw: &str) -> anyhow::Result<SpotId> {
    Ok(SpotId::new(raw)?)
}

async fn cmd_create(ctx: &Context, args: CreateArgs) -> anyhow::Result<()> {
    let draft = SpotDraft::new(args.place, args.name, args.lat, args.lng, args.category, args.icon)
        .with_tags(args.tags)
        .with_notes(args.notes)
        .with_images(read_uploads(&args.images).await?);
    let receipt = ctx.coordinator.create(&ctx.session, draft).await?;
    if ctx.json() {
        return print_json(&SpotView { id: &receipt.spot.id, spot: &receipt.spot });
    }
    println!("{} Saved {}", "✓".green().bold(), receipt.spot.id.as_str().yellow());
    print_spot(&receipt.spot);
    Ok(())
}

async fn cmd_edit(ctx: &Context, args: EditArgs) -> anyhow::Result<()> {
    let id = spot_id(&args.id)?;
    let current = ctx
        .coordinator
        .get(&ctx.session, &id)
        .await?
        .with_context(|| format!("no spot {id}"))?;

    let mut draft = SpotDraft::from_spot(&current);
    if let Some(place) = args.place {
        draft.place_id = place;
    }
    if let Some(name) = args.name {
        draft.name = name;
    }
    draft.lat = args.lat.or(draft.lat);
    draft.lng = args.lng.or(draft.lng);
    draft.category = args.category.or(draft.category);
    draft.icon = args.icon.or(draft.icon);
    if let Some(notes) = args.notes {
        draft.notes = notes;
    }
    if args.clear_tags {
        draft.tags.clear();
    } else if !args.tags.is_empty() {
        draft.tags = args.tags;
    }
    if args.clear_images || !args.keep.is_empty() {
        draft.images = args.keep.into_iter().map(ImageSource::keep).collect();
    }
    draft.images.extend(read_uploads(&args.images).await?);

    let receipt = ctx.coordinator.edit(&ctx.session, &id, draft).await?;
    if ctx.json() {
        return print_json(&SpotView { id: &receipt.spot.id, spot: &receipt.spot });
    }
    println!(
        "{} Updated {} ({} uploaded, {} removed)",
        "✓".green().bold(),
        id.as_str().yellow(),
        receipt.uploaded.len(),
        receipt.deleted.len()
    );
    print_spot(&receipt.spot);
    Ok(())
}

async fn cmd_delete(ctx: &Context, args: SpotArgs) -> anyhow::Result<()> {
    let id = spot_id(&args.id)?;
    let receipt = ctx.coordinator.delete(&ctx.session, &id).await?;
    if ctx.json() {
        return print_json(&serde_json::json!({
            "deleted": receipt.spot.id,
            "blobs": receipt.deleted,
        }));
    }
    println!(
        "{} Deleted {} and {} image(s)",
        "✓".green().bold(),
        receipt.spot.name.bold(),
        receipt.deleted.len()
    );
    Ok(())
}

async fn cmd_show(ctx: &Context, args: SpotArgs) -> anyhow::Result<()> {
    let id = spot_id(&args.id)?;
    let spot = ctx
        .coordinator
        .get(&ctx.session, &id)
        .await?
        .with_context(|| format!("no spot {id}"))?;
    if ctx.json() {
        return print_json(&SpotView { id: &spot.id, spot: &spot });
    }
    print_spot(&spot);
    Ok(())
}

async fn cmd_list(ctx: &Context) -> anyhow::Result<()> {
    let spots = ctx.coordinator.list(&ctx.session).await?;
    if ctx.json() {
        let views: Vec<SpotView<'_>> = spots.iter().map(|s| SpotView { id: &s.id, spot: s }).collect();
        return print_json(&views);
    }
    if spots.is_empty() {
        println!("No spots saved.");
        return Ok(());
    }
    for spot in &spots {
        println!(
            "{}  {}  {}  {}",
            spot.id.as_str().yellow(),
            spot.name.bold(),
            spot.category.as_str().dimmed(),
            spot.icon.label()
        );
    }
    Ok(())
}

async fn cmd_tagged(ctx: &Context, args: TaggedArgs) -> anyhow::Result<()> {
    let ids = ctx.coordinator.spots_with_tag(&ctx.session, &args.tag).await?;
    if ctx.json() {
        return print_json(&ids);
    }
    if ids.is_empty() {
        println!("No spots tagged {}.", args.tag.green());
    }
    for id in &ids {
        println!("{}", id.as_str().yellow());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

async fn cmd_checkpoints(ctx: &Context, args: CheckpointsArgs) -> anyhow::Result<()> {
    let owner = ctx.owner()?;
    let log = ctx.coordinator.checkpoints();
    if let Some(id) = args.discard {
        if !log.discard(owner, &id).await? {
            anyhow::bail!("no checkpoint {id}");
        }
        println!("{} Discarded checkpoint {}", "✓".green().bold(), id.yellow());
        return Ok(());
    }
    let pending = log.list(owner).await?;
    if ctx.json() {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("{} No orphaned checkpoints.", "✓".green().bold());
    }
    for p in &pending {
        let kind = if p.checkpoint.is_edit() { "edit" } else { "create" };
        println!(
            "{}  {}  spot {}  place {}  at {}",
            p.id.yellow(),
            kind.cyan(),
            p.checkpoint.spot_id,
            p.checkpoint.place_id,
            p.checkpoint.timestamp.to_rfc3339().dimmed()
        );
    }
    Ok(())
}

fn print_report(report: &AuditReport) {
    if report.is_clean() {
        println!("{} {} spot(s), no issues.", "✓".green().bold(), report.spots);
        return;
    }
    println!("{} {} spot(s) checked", "✗".red().bold(), report.spots);
    for p in &report.orphaned_checkpoints {
        println!("  {} {} (spot {})", "orphaned checkpoint:".yellow(), p.id, p.checkpoint.spot_id);
    }
    for m in &report.index_mismatches {
        println!(
            "  {} '{}' missing {} extra {}",
            "tag index mismatch:".yellow(),
            m.tag,
            m.missing.len(),
            m.extra.len()
        );
    }
    for id in &report.legacy_spots {
        println!("  {} {}", "legacy images:".yellow(), id);
    }
    for id in &report.unreadable_spots {
        println!("  {} {}", "unreadable spot:".red(), id);
    }
    for path in &report.orphaned_blobs {
        println!("  {} {}", "orphaned blob:".yellow(), path);
    }
    for path in &report.missing_blobs {
        println!("  {} {}", "missing blob:".red(), path);
    }
}

async fn cmd_fsck(ctx: &Context) -> anyhow::Result<()> {
    let report = ctx.auditor.audit(ctx.owner()?).await?;
    if ctx.json() {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

async fn cmd_reindex(ctx: &Context) -> anyhow::Result<()> {
    let repaired = ctx.auditor.reindex(ctx.owner()?).await?;
    if ctx.json() {
        return print_json(&repaired);
    }
    if repaired.is_empty() {
        println!("{} Tag index already consistent.", "✓".green().bold());
    } else {
        println!("{} Rebuilt {} tag row(s).", "✓".green().bold(), repaired.len());
    }
    Ok(())
}

async fn cmd_migrate_images(ctx: &Context) -> anyhow::Result<()> {
    let report = ctx.auditor.migrate_legacy_images(ctx.owner()?).await?;
    if ctx.json() {
        return print_json(&report);
    }
    println!("{} Migrated {} spot(s).", "✓".green().bold(), report.migrated.len());
    for skipped in &report.skipped {
        println!(
            "  {} {} {}",
            "skipped:".yellow(),
            skipped.spot_id,
            skipped.url.dimmed()
        );
    }
    Ok(())
}
