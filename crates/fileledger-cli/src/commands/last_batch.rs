//! `fileledger last-batch` command implementation

use fileledger_ingest::journal::{Journal, JournalOptions};

use super::{import_config, open_journal};
use crate::error::Result;

pub async fn run(importer: Option<&str>) -> Result<()> {
    let config = import_config(importer)?;
    let journal = open_journal(JournalOptions::new(&config.importer_name)).await?;

    match journal.last_batch().await? {
        Some(batch) => {
            println!("Batch:     {}", batch.id);
            println!("Importer:  {}", batch.importer_name);
            println!("Created:   {}", batch.created_moment.to_rfc3339());
            println!("Events:    {}", batch.total_events);
        },
        None => println!("No batches recorded for importer '{}'.", config.importer_name),
    }
    Ok(())
}
