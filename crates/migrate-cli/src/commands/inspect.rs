use crate::cli::InspectArgs;
use crate::config;
use anyhow::{Context, Result};
use migrate_core::connection::{self, Role};
use migrate_core::discovery;
use migrate_core::table_types::TableTypeRegistry;

pub async fn run(args: InspectArgs) -> Result<()> {
    let app = config::load(&args.config)?;
    let source = connection::open(&app.source, Role::Source).await.context("connecting to source")?;

    let info = discovery::get_partition_info(&source.client, &args.partition)
        .await?
        .ok_or_else(|| anyhow::anyhow!("{} is not registered in partition_table_info", args.partition))?;

    println!("partition: {}", info.table_name);
    println!("table type: {}", info.table_type_code);
    println!("date range: [{}, {}]", info.start_date, info.end_date);
    println!("exists on source: {}", info.exists);
    println!("row count: {}", info.row_count);

    if let Ok(table_type) = TableTypeRegistry::by_code(&info.table_type_code) {
        println!("columns: {}", table_type.column_list());
        println!("routing: {:?}", table_type.routing);
    }

    let estimate = connection::estimate_table_size(&source.client, &info.table_name, &source.version).await?;
    if estimate.exists {
        println!("size estimate: {} row(s), {} byte(s)", estimate.row_count, estimate.total_size_bytes);
    }

    Ok(())
}
