//! Delimited text (CSV, TSV, pipe separated) parser
//!
//! Each line is split with the `csv` crate, so quoted fields may contain the
//! delimiter, then deserialized into the record type with serde. With a
//! header row, struct fields are matched by header name; without one, by
//! position. Quoted values spanning several lines are not supported.

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use super::{LineDecoder, LineReader, ReadHooks, RecordParser, RecordStream};
use crate::error::{IngestError, Result};
use crate::record::ImportRecord;
use crate::types::ImportContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub has_header: bool,
    pub trim: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_header: true,
            trim: true,
        }
    }
}

impl DelimitedOptions {
    pub fn tab_separated() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    fn split(&self, line: &str) -> std::result::Result<StringRecord, String> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(false)
            .flexible(true)
            .trim(if self.trim { Trim::All } else { Trim::None })
            .from_reader(line.as_bytes());

        let mut record = StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => Ok(record),
            Ok(false) => Err("line has no fields".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub struct DelimitedParser<R> {
    options: DelimitedOptions,
    _record: PhantomData<fn() -> R>,
}

impl<R> DelimitedParser<R> {
    pub fn new(options: DelimitedOptions) -> Self {
        Self {
            options,
            _record: PhantomData,
        }
    }

    pub fn options(&self) -> &DelimitedOptions {
        &self.options
    }
}

impl<R> Default for DelimitedParser<R> {
    fn default() -> Self {
        Self::new(DelimitedOptions::default())
    }
}

struct DelimitedDecoder<R> {
    options: DelimitedOptions,
    headers: Option<StringRecord>,
    _record: PhantomData<fn() -> R>,
}

impl<R> LineDecoder<R> for DelimitedDecoder<R>
where
    R: ImportRecord + DeserializeOwned,
{
    fn header(&mut self, line: &str) -> Result<()> {
        let headers = self
            .options
            .split(line)
            .map_err(|e| IngestError::parse(1, format!("invalid header row: {}", e)))?;
        self.headers = Some(headers);
        Ok(())
    }

    fn decode(&mut self, line: &str) -> std::result::Result<R, String> {
        let fields = self.options.split(line)?;
        if let Some(headers) = &self.headers {
            if fields.len() != headers.len() {
                return Err(format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    fields.len()
                ));
            }
        }
        fields
            .deserialize(self.headers.as_ref())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl<R> RecordParser<R> for DelimitedParser<R>
where
    R: ImportRecord + DeserializeOwned,
{
    async fn create_reader(
        &self,
        context: &ImportContext,
        hooks: ReadHooks<R>,
    ) -> Result<Box<dyn RecordStream<R>>> {
        let decoder = DelimitedDecoder {
            options: self.options,
            headers: None,
            _record: PhantomData,
        };
        let reader = LineReader::open(context, decoder, hooks, self.options.has_header).await?;
        Ok(Box::new(reader))
    }
}
