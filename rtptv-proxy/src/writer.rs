//! Recording files on disk.
//!
//! Files are named `<channel>_[<title>_]<yyyy_MMdd_HHmm>_<instance>.ts`. The
//! instance id keeps concurrent recordings of the same channel and minute
//! apart; it is the smallest id in `1..=1000` that no `.ts` file in the
//! directory uses yet.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use rtptv_source::StreamUri;

/// Largest instance id handed out.
pub const MAX_INSTANCE_ID: u32 = 1000;

const SEPARATOR: char = '_';

/// A TS file being written by a recorder.
pub struct TsFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    instance_id: u32,
    bytes_written: u64,
}

impl TsFileWriter {
    /// Create a recording file in `dir` named after the current local time.
    pub fn create(dir: &Path, channel: &str, title: Option<&str>) -> io::Result<Self> {
        Self::create_at(dir, channel, title, Local::now())
    }

    /// Create a recording file in `dir` for a recording started at `start`.
    pub fn create_at(
        dir: &Path,
        channel: &str,
        title: Option<&str>,
        start: DateTime<Local>,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let used = existing_ids(dir)?;
        let instance_id = (1..=MAX_INSTANCE_ID)
            .find(|id| !used.contains(id))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("no free instance id in {}", dir.display()),
                )
            })?;

        let path = dir.join(file_name(channel, title, &start, instance_id));
        let file = File::create(&path)?;
        info!("[TsFileWriter] Recording to {}", path.display());

        Ok(Self {
            file: BufWriter::new(file),
            path,
            instance_id,
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `file://` URI of the recording, for playing it back.
    pub fn uri(&self) -> StreamUri {
        StreamUri::file(&self.path)
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }
}

impl Write for TsFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for TsFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            warn!("[TsFileWriter] Failed to flush {}: {}", self.path.display(), e);
        }
        debug!(
            "[TsFileWriter] Closed {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
    }
}

/// Keep user-supplied name parts from escaping the directory.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => SEPARATOR,
            c => c,
        })
        .collect()
}

fn file_name(
    channel: &str,
    title: Option<&str>,
    start: &DateTime<Local>,
    instance_id: u32,
) -> String {
    let mut name = sanitize(channel);
    name.push(SEPARATOR);
    if let Some(title) = title {
        name.push_str(&sanitize(title));
        name.push(SEPARATOR);
    }
    name.push_str(&start.format("%Y_%m%d_%H%M").to_string());
    name.push(SEPARATOR);
    name.push_str(&instance_id.to_string());
    name.push_str(".ts");
    name
}

/// Instance id encoded in a recording file name.
fn instance_id_of(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(".ts")?;
    let (_, id) = stem.rsplit_once(SEPARATOR)?;
    id.parse().ok().filter(|&id| id != 0)
}

fn existing_ids(dir: &Path) -> io::Result<HashSet<u32>> {
    let mut ids = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(instance_id_of) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 5, 9, 7, 0).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("rtptv-writer-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            file_name("NHK", None, &start_time(), 3),
            "NHK_2024_0105_0907_3.ts"
        );
        assert_eq!(
            file_name("NHK", Some("News"), &start_time(), 12),
            "NHK_News_2024_0105_0907_12.ts"
        );
        assert_eq!(
            file_name("a/b", Some("x:y"), &start_time(), 1),
            "a_b_x_y_2024_0105_0907_1.ts"
        );
    }

    #[test]
    fn test_instance_id_of() {
        assert_eq!(instance_id_of("NHK_2024_0105_0907_3.ts"), Some(3));
        assert_eq!(instance_id_of("NHK_News_2024_0105_0907_1000.ts"), Some(1000));
        assert_eq!(instance_id_of("NHK_2024_0105_0907_x.ts"), None);
        assert_eq!(instance_id_of("NHK_2024_0105_0907_0.ts"), None);
        assert_eq!(instance_id_of("notes.txt"), None);
        assert_eq!(instance_id_of("plain.ts"), None);
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let dir = temp_dir("ids");

        let mut first = TsFileWriter::create_at(&dir, "NHK", None, start_time()).unwrap();
        let second = TsFileWriter::create_at(&dir, "NHK", None, start_time()).unwrap();
        assert_eq!(first.instance_id(), 1);
        assert_eq!(second.instance_id(), 2);
        assert_ne!(first.path(), second.path());

        first.write_all(&[0x47; 188]).unwrap();
        first.flush().unwrap();
        assert_eq!(fs::metadata(first.path()).unwrap().len(), 188);

        let uri = first.uri();
        assert_eq!(uri.file_path(), Some(first.path()));
        assert!(uri.to_string().starts_with("file://"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_gaps_are_reused() {
        let dir = temp_dir("gaps");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("BS_2024_0101_0000_1.ts"), b"").unwrap();
        fs::write(dir.join("BS_2024_0101_0000_3.ts"), b"").unwrap();

        let writer = TsFileWriter::create_at(&dir, "BS", Some("Movie"), start_time()).unwrap();
        assert_eq!(writer.instance_id(), 2);
        assert_eq!(
            writer.path().file_name().unwrap(),
            "BS_Movie_2024_0105_0907_2.ts"
        );

        drop(writer);
        fs::remove_dir_all(&dir).unwrap();
    }
}
