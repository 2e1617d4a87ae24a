#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = migrate_cli::run(std::env::args().collect()).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
