//! Origin Tools console.
//!
//! Runs the outfit, follow and mimic engine against a transport feed read
//! from stdin:
//!
//! ```bash
//! cargo run -p origin-tools -- --outfits ./outfit_config.json < session.jsonl
//! ```

mod headless;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Logs go to stderr; stdout carries the console protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = headless::parse_config_from_args(&args);
    headless::run_console(config).await?;
    Ok(())
}

fn print_help() {
    println!("Origin Tools - outfit, follow and mimic console");
    println!();
    println!("USAGE:");
    println!("  origin-tools [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help          Show this help message");
    println!("  --outfits <PATH>    Outfit preset file");
    println!("                      (default: <config dir>/Origin-Tools/outfit_config.json)");
    println!("  --poll-ms <MS>      Room poll interval in milliseconds (default: 1000)");
    println!();
    println!("ENVIRONMENT:");
    println!("  {}   Outfit preset file, overridden by --outfits", headless::OUTFITS_ENV);
    println!("  RUST_LOG              Log filter (default: info)");
    println!();
    println!("INPUT:");
    println!("  One JSON transport event per line, or a #command. Type #help once running.");
    println!();
    println!("EXAMPLES:");
    println!(r#"  {{"packet": {{"header": {{"out": "chat"}}, "fields": [{{"str": ":follow bob"}}]}}}}"#);
    println!(r#"  {{"entity_updated": {{"index": 2, "name": "bob", "tile": {{"x": 4, "y": 7}}}}}}"#);
    println!("  #copy alice");
}
