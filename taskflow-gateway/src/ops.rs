//! Filesystem effects for a validated [`FileCommand`].
//!
//! Paths reaching this module have already passed containment. Failures here
//! are runtime failures (exit code 1), never security rejections.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::command::FileCommand;
use crate::containment::display_relative;

/// Perform `command` and return its stdout text.
pub fn run(root: &Path, command: &FileCommand<PathBuf>) -> Result<String> {
    let rel = |path: &Path| display_relative(root, path);
    match command {
        FileCommand::List { path } => list(path),
        FileCommand::Read { path } => {
            if path.is_dir() {
                bail!("{} is a directory", rel(path));
            }
            let bytes = fs::read(path).with_context(|| format!("read {}", rel(path)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        FileCommand::Write {
            path,
            value,
            append,
        } => {
            if path.is_dir() {
                bail!("{} is a directory", rel(path));
            }
            ensure_parent(root, path)?;
            if *append {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open {}", rel(path)))?;
                file.write_all(value.as_bytes())
                    .with_context(|| format!("append {}", rel(path)))?;
                Ok(format!("appended {} bytes to {}\n", value.len(), rel(path)))
            } else {
                fs::write(path, value).with_context(|| format!("write {}", rel(path)))?;
                Ok(format!("wrote {} bytes to {}\n", value.len(), rel(path)))
            }
        }
        FileCommand::CreateFile { path, value, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use -Force to overwrite)", rel(path));
            }
            ensure_parent(root, path)?;
            fs::write(path, value).with_context(|| format!("create {}", rel(path)))?;
            Ok(format!("created file {}\n", rel(path)))
        }
        FileCommand::CreateDirectory { path } => {
            if path.is_file() {
                bail!("{} exists and is a file", rel(path));
            }
            fs::create_dir_all(path).with_context(|| format!("create directory {}", rel(path)))?;
            Ok(format!("created directory {}\n", rel(path)))
        }
        FileCommand::Copy {
            from,
            to,
            recurse,
            force,
        } => {
            let target = into_directory(from, to);
            if target.exists() && !force {
                bail!("{} already exists (use -Force to overwrite)", rel(&target));
            }
            if from.is_dir() {
                if !recurse {
                    bail!("{} is a directory (use -Recurse)", rel(from));
                }
                if target.starts_with(from) {
                    bail!("cannot copy {} into itself", rel(from));
                }
                copy_tree(from, &target)?;
            } else {
                refuse_symlink(&target, &rel)?;
                ensure_parent(root, &target)?;
                fs::copy(from, &target)
                    .with_context(|| format!("copy {} to {}", rel(from), rel(&target)))?;
            }
            Ok(format!("copied {} to {}\n", rel(from), rel(&target)))
        }
        FileCommand::Move { from, to, force } => {
            if fs::symlink_metadata(from).is_err() {
                bail!("{} does not exist", rel(from));
            }
            let target = into_directory(from, to);
            if target.starts_with(from) && target != *from {
                bail!("cannot move {} into itself", rel(from));
            }
            replace_target(&target, *force, &rel)?;
            ensure_parent(root, &target)?;
            fs::rename(from, &target)
                .with_context(|| format!("move {} to {}", rel(from), rel(&target)))?;
            Ok(format!("moved {} to {}\n", rel(from), rel(&target)))
        }
        FileCommand::Rename {
            path,
            new_name,
            force,
        } => {
            if fs::symlink_metadata(path).is_err() {
                bail!("{} does not exist", rel(path));
            }
            let target = path.with_file_name(new_name);
            replace_target(&target, *force, &rel)?;
            fs::rename(path, &target)
                .with_context(|| format!("rename {} to {}", rel(path), new_name))?;
            Ok(format!("renamed {} to {}\n", rel(path), rel(&target)))
        }
        FileCommand::Remove { path, recurse } => {
            let meta = fs::symlink_metadata(path)
                .with_context(|| format!("{} does not exist", rel(path)))?;
            if meta.is_dir() {
                if *recurse {
                    fs::remove_dir_all(path)
                        .with_context(|| format!("remove directory {}", rel(path)))?;
                } else {
                    fs::remove_dir(path).with_context(|| {
                        format!("remove directory {} (use -Recurse if not empty)", rel(path))
                    })?;
                }
            } else {
                fs::remove_file(path).with_context(|| format!("remove {}", rel(path)))?;
            }
            Ok(format!("removed {}\n", rel(path)))
        }
        FileCommand::Stat { path } => Ok(match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => "directory\n".to_string(),
            Ok(meta) => format!("file {}\n", meta.len()),
            Err(_) => "missing\n".to_string(),
        }),
    }
}

fn list(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).with_context(|| format!("{} does not exist", path.display()))?;
    if !meta.is_dir() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(format!("{name}\n"));
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(path).with_context(|| format!("list {}", path.display()))? {
        let entry = entry.context("read directory entry")?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    let mut out = String::new();
    for name in names {
        out.push_str(&name);
        out.push('\n');
    }
    Ok(out)
}

/// `cp a.txt dir/` lands at `dir/a.txt` when `dir` already exists.
pub(crate) fn into_directory(from: &Path, to: &Path) -> PathBuf {
    match from.file_name() {
        Some(name) if to.is_dir() => to.join(name),
        _ => to.to_path_buf(),
    }
}

fn replace_target(target: &Path, force: bool, rel: &impl Fn(&Path) -> String) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(target) else {
        return Ok(());
    };
    if !force {
        bail!("{} already exists (use -Force to overwrite)", rel(target));
    }
    if meta.is_dir() {
        bail!("{} is an existing directory", rel(target));
    }
    fs::remove_file(target).with_context(|| format!("remove {}", rel(target)))
}

fn refuse_symlink(target: &Path, rel: &impl Fn(&Path) -> String) -> Result<()> {
    if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
        bail!("{} is a symbolic link", rel(target));
    }
    Ok(())
}

fn ensure_parent(root: &Path, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && parent.starts_with(root)
        && !parent.exists()
    {
        debug!(parent = %parent.display(), "creating parent directories");
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", display_relative(root, parent)))?;
    }
    Ok(())
}

// Source symlinks are skipped so a copy never pulls content from outside the
// tree; destination symlinks abort the copy so it never writes through one.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("create directory {}", to.display()))?;
    for entry in fs::read_dir(from).with_context(|| format!("list {}", from.display()))? {
        let entry = entry.context("read directory entry")?;
        let file_type = entry.file_type().context("read file type")?;
        let dest = to.join(entry.file_name());
        if fs::symlink_metadata(&dest).is_ok_and(|meta| meta.file_type().is_symlink()) {
            bail!("{} is a symbolic link", dest.display());
        }
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular entry");
        }
    }
    Ok(())
}
