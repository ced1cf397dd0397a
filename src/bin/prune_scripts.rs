//! One-shot maintenance binary (§4.11): deletes `*.user.js`/`*.meta.json`
//! pairs that have lost their sibling.

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

/// Removes orphaned userscript/metadata pairs under a storage root.
#[derive(Debug, Parser)]
#[command(name = "prune-scripts", version, about)]
struct Args {
    /// Storage root to walk.
    root: Utf8PathBuf,

    /// Report what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    if !args.root.is_dir() {
        anyhow::bail!("root `{}` does not exist or is not a directory", args.root);
    }

    let mut orphans = Vec::new();
    walk(&args.root, &mut orphans)?;

    for orphan in &orphans {
        if args.dry_run {
            println!("would delete {orphan}");
        } else {
            println!("deleting {orphan}");
            std::fs::remove_file(orphan)?;
        }
    }

    if orphans.is_empty() {
        println!("no orphaned scripts found");
    }

    Ok(())
}

fn walk(dir: &Utf8Path, orphans: &mut Vec<Utf8PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|p| anyhow::anyhow!("path `{}` is not valid UTF-8", p.display()))?;

        if entry.file_type()?.is_dir() {
            walk(&path, orphans)?;
            continue;
        }

        if let Some(stem) = path.as_str().strip_suffix(".user.js") {
            let meta = Utf8PathBuf::from(format!("{stem}.meta.json"));
            if !meta.is_file() {
                orphans.push(path.clone());
            }
        } else if let Some(stem) = path.as_str().strip_suffix(".meta.json") {
            let script = Utf8PathBuf::from(format!("{stem}.user.js"));
            if !script.is_file() {
                orphans.push(path.clone());
            }
        }
    }

    Ok(())
}
