use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

/// Writes `contents` to `path`, refusing to replace an existing file unless
/// `force` is set. Parent directories are created.
pub fn write_output(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("output already exists: {}", path.display());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut out = options
        .open(path)
        .with_context(|| format!("open output: {}", path.display()))?;
    out.write_all(contents.as_bytes())
        .with_context(|| format!("write output: {}", path.display()))?;
    out.flush().context("flush output")?;
    Ok(())
}
