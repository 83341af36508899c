//! Parser contract and the line reader shared by text formats
//!
//! A parser opens one file and hands back a forward-only [`RecordStream`].
//! Streams are single pass: once a record has been yielded it cannot be read
//! again, and a failed file is retried from the start by opening a new stream.

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::progress::ProgressReporter;
use crate::record::ImportRecord;
use crate::types::ImportContext;

pub mod delimited;

pub use delimited::{DelimitedOptions, DelimitedParser};

/// State handed to read hooks for one line of input
pub struct LineContext<'a, R> {
    pub context: &'a ImportContext,
    /// 1-based line number within the file
    pub line_number: u64,
    /// Raw text of the line; a `before_read` hook may rewrite it
    pub raw_line: String,
    /// Parsed record; `None` while `before_read` runs
    pub record: Option<R>,
    /// Set to drop the line without yielding a record
    pub skip: bool,
}

pub type ReadHook<R> = Box<dyn for<'a> FnMut(&mut LineContext<'a, R>) + Send>;

/// Callbacks run around each line
pub struct ReadHooks<R> {
    pub before_read: Option<ReadHook<R>>,
    pub after_read: Option<ReadHook<R>>,
}

impl<R> Default for ReadHooks<R> {
    fn default() -> Self {
        Self {
            before_read: None,
            after_read: None,
        }
    }
}

impl<R> fmt::Debug for ReadHooks<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHooks")
            .field("before_read", &self.before_read.is_some())
            .field("after_read", &self.after_read.is_some())
            .finish()
    }
}

impl<R> ReadHooks<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_read<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnMut(&mut LineContext<'a, R>) + Send + 'static,
    {
        self.before_read = Some(Box::new(hook));
        self
    }

    pub fn after_read<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnMut(&mut LineContext<'a, R>) + Send + 'static,
    {
        self.after_read = Some(Box::new(hook));
        self
    }
}

/// Forward-only sequence of records from one file
#[async_trait]
pub trait RecordStream<R>: Send {
    /// Next record, or `None` once the file is exhausted
    async fn next_record(&mut self) -> Result<Option<R>>;

    /// Last line read so far, for locating failures
    fn line_number(&self) -> u64;
}

/// Turns files into typed records
#[async_trait]
pub trait RecordParser<R: ImportRecord>: Send + Sync {
    async fn create_reader(
        &self,
        context: &ImportContext,
        hooks: ReadHooks<R>,
    ) -> Result<Box<dyn RecordStream<R>>>;
}

/// Decodes one line of text into a record
pub trait LineDecoder<R>: Send {
    /// Called with the first line when the format has a header row
    fn header(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, line: &str) -> std::result::Result<R, String>;
}

type RawLine = (Vec<u8>, usize);

/// Reads a file line by line through a [`LineDecoder`].
///
/// Lines are read as bytes and must be UTF-8. A failure to decode the final
/// line is logged and ignored: exports often end with a truncated or trailer
/// line. Any other failure ends the stream.
pub struct LineReader<R, D> {
    reader: BufReader<tokio::fs::File>,
    decoder: D,
    context: ImportContext,
    hooks: ReadHooks<R>,
    progress: ProgressReporter,
    has_header: bool,
    line_number: u64,
    bytes_read: u64,
    lookahead: Option<RawLine>,
    primed: bool,
}

impl<R, D> LineReader<R, D>
where
    R: ImportRecord,
    D: LineDecoder<R>,
{
    pub async fn open(
        context: &ImportContext,
        decoder: D,
        hooks: ReadHooks<R>,
        has_header: bool,
    ) -> Result<Self> {
        let file = tokio::fs::File::open(&context.file_path).await?;
        debug!(path = %context.file_path.display(), import_id = context.import_id, "Opened file for reading");

        Ok(Self {
            reader: BufReader::new(file),
            decoder,
            progress: ProgressReporter::new(context.byte_length),
            context: context.clone(),
            hooks,
            has_header,
            line_number: 0,
            bytes_read: 0,
            lookahead: None,
            primed: false,
        })
    }

    async fn read_raw(&mut self) -> Result<Option<RawLine>> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some((buf, read)))
    }

    /// Next raw line and whether it is the last one in the file
    async fn next_line(&mut self) -> Result<Option<(Vec<u8>, bool)>> {
        let current = if self.primed {
            self.lookahead.take()
        } else {
            self.primed = true;
            self.read_raw().await?
        };
        let Some((line, read)) = current else {
            return Ok(None);
        };

        self.lookahead = self.read_raw().await?;
        self.line_number += 1;
        self.bytes_read += read as u64;
        self.progress.report(self.bytes_read);

        Ok(Some((line, self.lookahead.is_none())))
    }

    /// Fail on a bad line, unless it is the last one in the file
    fn reject(&self, message: String, is_last: bool) -> Result<Option<R>> {
        if !is_last {
            return Err(IngestError::parse(self.line_number, message));
        }
        warn!(
            line = self.line_number,
            path = %self.context.file_path.display(),
            error = %message,
            "Ignoring unparseable final line"
        );
        Ok(None)
    }
}

#[async_trait]
impl<R, D> RecordStream<R> for LineReader<R, D>
where
    R: ImportRecord,
    D: LineDecoder<R>,
{
    async fn next_record(&mut self) -> Result<Option<R>> {
        loop {
            let Some((bytes, is_last)) = self.next_line().await? else {
                return Ok(None);
            };
            let raw_line = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => return self.reject(format!("invalid UTF-8: {}", e.utf8_error()), is_last),
            };

            if self.has_header && self.line_number == 1 {
                self.decoder.header(&raw_line)?;
                continue;
            }

            let mut line = LineContext {
                context: &self.context,
                line_number: self.line_number,
                raw_line,
                record: None,
                skip: false,
            };

            if let Some(hook) = self.hooks.before_read.as_mut() {
                hook(&mut line);
                if line.skip {
                    continue;
                }
            }

            if line.raw_line.trim().is_empty() {
                continue;
            }

            let mut record = match self.decoder.decode(&line.raw_line) {
                Ok(record) => record,
                Err(message) => return self.reject(message, is_last),
            };
            record.set_import_id(self.context.import_id);
            line.record = Some(record);

            if let Some(hook) = self.hooks.after_read.as_mut() {
                hook(&mut line);
                if line.skip {
                    continue;
                }
            }

            if let Some(record) = line.record {
                return Ok(Some(record));
            }
        }
    }

    fn line_number(&self) -> u64 {
        self.line_number
    }
}

/// Stream over records already in memory, mostly for tests and replays
pub struct VecStream<R> {
    records: std::vec::IntoIter<R>,
    line_number: u64,
}

impl<R> VecStream<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: records.into_iter(),
            line_number: 0,
        }
    }
}

#[async_trait]
impl<R: Send> RecordStream<R> for VecStream<R> {
    async fn next_record(&mut self) -> Result<Option<R>> {
        let next = self.records.next();
        if next.is_some() {
            self.line_number += 1;
        }
        Ok(next)
    }

    fn line_number(&self) -> u64 {
        self.line_number
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use std::path::Path;

    #[derive(Debug, PartialEq)]
    struct Word {
        import_id: i64,
        text: String,
    }

    impl ImportRecord for Word {
        fn import_id(&self) -> i64 {
            self.import_id
        }

        fn set_import_id(&mut self, import_id: i64) {
            self.import_id = import_id;
        }

        fn field(&self, name: &str) -> Option<FieldValue> {
            (name == "text").then(|| self.text.as_str().into())
        }
    }

    /// Accepts lowercase words only
    struct WordDecoder;

    impl LineDecoder<Word> for WordDecoder {
        fn decode(&mut self, line: &str) -> std::result::Result<Word, String> {
            if line.chars().all(|c| c.is_ascii_lowercase()) {
                Ok(Word {
                    import_id: 0,
                    text: line.to_string(),
                })
            } else {
                Err(format!("not a word: {}", line))
            }
        }
    }

    fn context(path: &Path) -> ImportContext {
        ImportContext {
            import_id: 42,
            file_path: path.to_path_buf(),
            byte_length: std::fs::metadata(path).unwrap().len(),
            content_hash: "H".into(),
        }
    }

    async fn read_all(
        content: impl AsRef<[u8]>,
        hooks: ReadHooks<Word>,
        has_header: bool,
    ) -> (Result<Vec<Word>>, u64) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, content).unwrap();

        let ctx = context(&path);
        let mut reader = LineReader::open(&ctx, WordDecoder, hooks, has_header)
            .await
            .unwrap();
        let mut words = Vec::new();
        loop {
            match reader.next_record().await {
                Ok(Some(word)) => words.push(word),
                Ok(None) => return (Ok(words), reader.line_number()),
                Err(e) => return (Err(e), reader.line_number()),
            }
        }
    }

    #[tokio::test]
    async fn test_reads_and_stamps_records() {
        let (words, lines) = read_all("alpha\nbeta\r\n\ngamma\n", ReadHooks::new(), false).await;
        let words = words.unwrap();
        assert_eq!(words.len(), 3);
        assert!(words.iter().all(|w| w.import_id == 42));
        assert_eq!(lines, 4);
    }

    #[tokio::test]
    async fn test_header_is_not_decoded() {
        let (words, _) = read_all("WORD\nalpha\n", ReadHooks::new(), true).await;
        assert_eq!(words.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_final_line_is_ignored() {
        let (words, _) = read_all("alpha\nbeta\nTRAILER 2", ReadHooks::new(), false).await;
        assert_eq!(words.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_middle_line_fails_with_line_number() {
        let (words, _) = read_all("alpha\nBeta\ngamma\n", ReadHooks::new(), false).await;
        match words {
            Err(IngestError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_on_its_own_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"alpha\nbeta\njos\xE9\ngamma\n").unwrap();

        let ctx = context(&path);
        let mut reader = LineReader::open(&ctx, WordDecoder, ReadHooks::new(), false)
            .await
            .unwrap();
        assert_eq!(reader.next_record().await.unwrap().unwrap().text, "alpha");
        assert_eq!(reader.next_record().await.unwrap().unwrap().text, "beta");

        match reader.next_record().await {
            Err(IngestError::Parse { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("UTF-8"));
            },
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_final_line_is_ignored() {
        let (words, lines) = read_all(&b"alpha\nbeta\njos\xE9"[..], ReadHooks::new(), false).await;
        assert_eq!(words.unwrap().len(), 2);
        assert_eq!(lines, 3);
    }

    #[tokio::test]
    async fn test_before_read_can_rewrite_and_skip() {
        let hooks = ReadHooks::new().before_read(|line: &mut LineContext<'_, Word>| {
            if line.raw_line.starts_with('#') {
                line.skip = true;
            } else {
                line.raw_line = line.raw_line.to_lowercase();
            }
        });
        let (words, _) = read_all("# comment\nAlpha\nBETA\n", hooks, false).await;
        let texts: Vec<_> = words.unwrap().into_iter().map(|w| w.text).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_after_read_sees_stamped_record_and_can_skip() {
        let hooks = ReadHooks::new().after_read(|line: &mut LineContext<'_, Word>| {
            let record = line.record.as_ref().unwrap();
            assert_eq!(record.import_id, line.context.import_id);
            line.skip = record.text == "beta";
        });
        let (words, _) = read_all("alpha\nbeta\ngamma\n", hooks, false).await;
        assert_eq!(words.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_vec_stream() {
        let mut stream = VecStream::new(vec![1, 2]);
        assert_eq!(stream.next_record().await.unwrap(), Some(1));
        assert_eq!(stream.next_record().await.unwrap(), Some(2));
        assert_eq!(stream.next_record().await.unwrap(), None);
        assert_eq!(stream.line_number(), 2);
    }
}
