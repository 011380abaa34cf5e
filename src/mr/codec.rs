//! The record format shared by map output, reduce input and reduce output:
//! one JSON object per line.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader, BufWriter};

use super::KeyValue;

pub struct RecordWriter<W> {
    out: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        RecordWriter { out, buf: Vec::new() }
    }

    pub async fn write(&mut self, kv: &KeyValue) -> Result<(), anyhow::Error> {
        self.buf.clear();
        serde_json::to_writer(&mut self.buf, kv)?;
        self.buf.push(b'\n');
        self.out.write_all(&self.buf).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<W, anyhow::Error> {
        self.out.flush().await?;
        Ok(self.out)
    }
}

/// Records decoded from one file.
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<KeyValue>,
    /// Lines that were not a valid record.
    pub skipped: usize,
}

/// Decodes every record of `path` until end of file.
///
/// A malformed line is counted in [`Decoded::skipped`] and decoding goes on
/// with the next line. Only failing to open or read the file is an error.
pub async fn read_records(path: &Path) -> Result<Decoded, anyhow::Error> {
    let file = File::open(path).await
        .with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut decoded = Decoded::default();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<KeyValue>(trimmed) {
            Ok(kv) => decoded.records.push(kv),
            Err(e) => {
                log::debug!("bad record in {}: {}", path.display(), e);
                decoded.skipped += 1;
            }
        }
    }
    Ok(decoded)
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A record file that only appears under its final name once complete.
///
/// Records go to a uniquely named sibling which [`AtomicRecordFile::commit`]
/// renames over the target. Two attempts writing the same target each rename
/// a complete file; the last rename wins.
pub struct AtomicRecordFile {
    path: PathBuf,
    pending: Option<(PathBuf, RecordWriter<BufWriter<File>>)>,
}

impl AtomicRecordFile {
    pub async fn create(path: &Path) -> Result<Self, anyhow::Error> {
        let file_name = path.file_name()
            .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp-{}-{}", std::process::id(), TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        let tmp = path.with_file_name(tmp_name);
        let file = File::create(&tmp).await
            .with_context(|| format!("create {}", tmp.display()))?;
        Ok(AtomicRecordFile {
            path: path.to_path_buf(),
            pending: Some((tmp, RecordWriter::new(BufWriter::new(file)))),
        })
    }

    pub async fn write(&mut self, kv: &KeyValue) -> Result<(), anyhow::Error> {
        let Some((_, writer)) = self.pending.as_mut() else {
            anyhow::bail!("{} already committed", self.path.display());
        };
        writer.write(kv).await
            .with_context(|| format!("write {}", self.path.display()))
    }

    pub async fn commit(mut self) -> Result<(), anyhow::Error> {
        let Some((tmp, writer)) = self.pending.take() else {
            return Ok(());
        };
        let result = async {
            let file = writer.finish().await?.into_inner();
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok::<_, anyhow::Error>(())
        }.await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result.with_context(|| format!("commit {}", self.path.display()))
    }
}

impl Drop for AtomicRecordFile {
    fn drop(&mut self) {
        // never committed: the partial file must not linger
        if let Some((tmp, _)) = self.pending.take() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

/// Writes `records` to `path` through an [`AtomicRecordFile`].
pub async fn write_records<'a, I>(path: &Path, records: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = &'a KeyValue>,
{
    let mut out = AtomicRecordFile::create(path).await?;
    for kv in records {
        out.write(kv).await?;
    }
    out.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_read_back_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        let written = vec![
            KeyValue::new("a", "1"),
            KeyValue::new("b", "two words"),
            KeyValue::new("a", "1"),
            KeyValue::new("line\nbreak", "{\"json\": true}"),
            KeyValue::new("", ""),
        ];
        write_records(&path, &written).await.unwrap();

        let decoded = read_records(&path).await.unwrap();
        assert_eq!(decoded.skipped, 0);
        let mut got = decoded.records;
        let mut want = written;
        got.sort_by(|x, y| (&x.key, &x.value).cmp(&(&y.key, &y.value)));
        want.sort_by(|x, y| (&x.key, &x.value).cmp(&(&y.key, &y.value)));
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        let contents = concat!(
            "{\"key\":\"a\",\"value\":\"1\"}\n",
            "not json at all\n",
            "\n",
            "{\"key\":\"b\"}\n",
            "{\"key\":\"c\",\"value\":\"3\"}",
        );
        tokio::fs::write(&path, contents).await.unwrap();

        let decoded = read_records(&path).await.unwrap();
        assert_eq!(decoded.records, vec![KeyValue::new("a", "1"), KeyValue::new("c", "3")]);
        assert_eq!(decoded.skipped, 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn target_appears_only_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut out = AtomicRecordFile::create(&path).await.unwrap();
        out.write(&KeyValue::new("k", "v")).await.unwrap();
        assert!(!path.exists());
        out.commit().await.unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn abandoned_file_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut out = AtomicRecordFile::create(&path).await.unwrap();
        out.write(&KeyValue::new("k", "v")).await.unwrap();
        drop(out);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
