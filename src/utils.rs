use std::path::Path as FsPath;
use std::time::Instant;

use polars::prelude::{DataFrame, ParquetWriter};

use crate::error::{DatasetError, Result};

/// Logs elapsed time for a named phase on drop when debug timing is on.
pub(crate) struct DebugTimer {
    name: String,
    start: Instant,
    enabled: bool,
}

impl DebugTimer {
    pub fn new(enabled: bool, name: impl Into<String>) -> DebugTimer {
        DebugTimer {
            name: name.into(),
            start: Instant::now(),
            enabled,
        }
    }
}

impl Drop for DebugTimer {
    fn drop(&mut self) {
        if self.enabled {
            tracing::debug!(
                elapsed_ms = self.start.elapsed().as_millis() as u64,
                "{}",
                self.name
            );
        }
    }
}

/// Writes a frame to `dir/filename` through a temporary name in the same
/// directory, renamed into place once fully written. A failed write leaves
/// no partial file behind.
pub(crate) fn write_parquet_atomic(
    df: &mut DataFrame,
    dir: &FsPath,
    filename: &str,
) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    ParquetWriter::new(tmp.as_file_mut()).finish(df)?;
    tmp.persist(dir.join(filename))
        .map_err(|e| DatasetError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn atomic_write_lands_final_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = df!("a" => [1i64, 2, 3]).unwrap();
        write_parquet_atomic(&mut df, dir.path(), "out.parquet").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["out.parquet".to_string()]);

        let back = LazyFrame::scan_parquet(
            PlPathRef::from_local_path(&dir.path().join("out.parquet")).into_owned(),
            Default::default(),
        )
        .unwrap()
        .collect()
        .unwrap();
        assert_eq!(back.height(), 3);
    }
}
