use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use plubot_core::FlowSnapshot;
use plubot_editor::{EditorContext, EditorSettings, Persistence};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and repair persisted Plubot flows", long_about = None)]
struct Cli {
    /// Path to the SQLite database (defaults to the configured storage path)
    #[arg(short, long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List projects with a saved flow or an automatic backup
    Projects,
    /// Show how many entries and bytes the database holds
    Stats,
    /// Summarize the saved flow, pending backup and manual backups of a project
    Show { project: String },
    /// Inspect or resolve a pending crash-recovery backup
    Recover {
        project: String,
        /// Make the backup the saved flow
        #[arg(long, conflicts_with = "dismiss")]
        accept: bool,
        /// Delete the backup and keep the saved flow
        #[arg(long)]
        dismiss: bool,
    },
    /// Manage named manual backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Print the saved flow as JSON
    Export {
        project: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    List {
        project: String,
    },
    Export {
        project: String,
        id: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    Import {
        project: String,
        file: PathBuf,
    },
    Delete {
        project: String,
        id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let mut settings = EditorSettings::load();
    if let Some(db) = cli.db {
        settings.storage_path = Some(db);
    }
    let context = EditorContext::new(settings);
    let open_persistence = || -> Result<Persistence> {
        let storage = context
            .open_storage()
            .context("Failed to open flow storage")?;
        Ok(context.persistence(Box::new(storage)))
    };

    match cli.command {
        Command::Projects => {
            let persistence = open_persistence()?;
            let projects = persistence.list_projects()?;
            if projects.is_empty() {
                writeln!(out, "No projects stored")?;
            }
            for project in projects {
                writeln!(out, "{project}")?;
            }
        }
        Command::Stats => {
            let storage = context.open_storage().context("Failed to open flow storage")?;
            let stats = storage.get_stats()?;
            writeln!(
                out,
                "{} entries, {} bytes",
                stats.entry_count, stats.total_bytes
            )?;
        }
        Command::Show { project } => {
            let persistence = open_persistence()?;
            show(&persistence, &project, out)?;
        }
        Command::Recover {
            project,
            accept,
            dismiss,
        } => {
            let storage = context.open_storage().context("Failed to open flow storage")?;
            let mut editor = context.open_editor(&project, Box::new(storage))?;
            let Some(offer) = editor.pending_recovery().cloned() else {
                writeln!(out, "No recovery pending for {project}")?;
                return Ok(());
            };
            if accept {
                editor.accept_recovery();
                editor.save()?;
                editor.persistence().discard_backup(&project)?;
                writeln!(
                    out,
                    "Recovered {} nodes and {} edges from {}",
                    offer.backup.nodes.len(),
                    offer.backup.edges.len(),
                    format_timestamp(offer.backup_timestamp)
                )?;
            } else if dismiss {
                editor.dismiss_recovery()?;
                writeln!(out, "Backup for {project} discarded")?;
            } else {
                writeln!(
                    out,
                    "Backup from {} ({} nodes, {} edges) is newer than the saved flow ({})",
                    format_timestamp(offer.backup_timestamp),
                    offer.backup.nodes.len(),
                    offer.backup.edges.len(),
                    offer
                        .saved_timestamp
                        .map(format_timestamp)
                        .unwrap_or_else(|| "never saved".to_string())
                )?;
                writeln!(out, "Run with --accept or --dismiss to resolve it")?;
            }
        }
        Command::Backups { action } => {
            let persistence = open_persistence()?;
            backups(&persistence, action, out)?;
        }
        Command::Export { project, out: path } => {
            let persistence = open_persistence()?;
            let Some(snapshot) = persistence.load_saved(&project)? else {
                bail!("No saved flow for {project}");
            };
            let json = serde_json::to_string_pretty(&snapshot)?;
            emit(&json, path, out)?;
        }
    }
    Ok(())
}

fn show(persistence: &Persistence, project: &str, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Project: {project}")?;
    match persistence.load_saved(project)? {
        Some(saved) => write_snapshot_line(out, "Saved", &saved)?,
        None => writeln!(out, "Saved:   none")?,
    }
    match persistence.load_backup(project) {
        Ok(Some(backup)) => write_snapshot_line(out, "Backup", &backup)?,
        Ok(None) => writeln!(out, "Backup:  none")?,
        Err(e) => writeln!(out, "Backup:  unreadable ({e})")?,
    }
    if persistence.check_recovery(project).is_some() {
        writeln!(out, "Recovery pending: the backup is newer than the saved flow")?;
    }
    let manual = persistence.list_manual_backups(project);
    writeln!(out, "Manual backups: {}", manual.len())?;
    Ok(())
}

fn backups(persistence: &Persistence, action: BackupAction, out: &mut impl Write) -> Result<()> {
    match action {
        BackupAction::List { project } => {
            let backups = persistence.list_manual_backups(&project);
            if backups.is_empty() {
                writeln!(out, "No manual backups for {project}")?;
            }
            for backup in backups {
                writeln!(
                    out,
                    "{}  {}  {:<24} {} nodes, {} edges, {} bytes",
                    backup.id,
                    format_timestamp(backup.timestamp),
                    backup.name,
                    backup.node_count,
                    backup.edge_count,
                    backup.size
                )?;
            }
        }
        BackupAction::Export {
            project,
            id,
            out: path,
        } => {
            let json = persistence.export_manual_backup(&project, &id)?;
            emit(&json, path, out)?;
        }
        BackupAction::Import { project, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let backup = persistence.import_manual_backup(&project, &raw)?;
            writeln!(out, "Imported {} as {}", backup.name, backup.id)?;
        }
        BackupAction::Delete { project, id } => {
            persistence.delete_manual_backup(&project, &id)?;
            writeln!(out, "Deleted {id}")?;
        }
    }
    Ok(())
}

fn write_snapshot_line(out: &mut impl Write, label: &str, snapshot: &FlowSnapshot) -> Result<()> {
    writeln!(
        out,
        "{:<8} {} nodes, {} edges at {}",
        format!("{label}:"),
        snapshot.nodes.len(),
        snapshot.edges.len(),
        format_timestamp(snapshot.timestamp)
    )?;
    Ok(())
}

fn emit(content: &str, path: Option<PathBuf>, out: &mut impl Write) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            writeln!(out, "Wrote {}", path.display())?;
        }
        None => writeln!(out, "{content}")?,
    }
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
