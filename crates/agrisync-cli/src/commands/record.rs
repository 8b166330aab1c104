use std::path::Path;

use agrisync_core::NewCollection;

use crate::commands::common::open_local_engine;
use crate::error::CliError;

pub struct RecordArgs {
    pub farmer: String,
    pub crop: String,
    pub weight: f64,
    pub price: f64,
    pub collector: Option<String>,
}

impl From<RecordArgs> for NewCollection {
    fn from(args: RecordArgs) -> Self {
        let input = Self::new(args.farmer, args.crop, args.weight).with_price_per_kg(args.price);
        match args.collector {
            Some(collector) => input.with_collector(collector),
            None => input,
        }
    }
}

pub async fn run_record(args: RecordArgs, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let engine = open_local_engine(db_path).await?;
    let receipt = engine.record_collection(args.into()).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!("{}", receipt.collection.id);
    }
    Ok(())
}
