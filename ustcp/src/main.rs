use ustcp::cli::initialize_from_arguments;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("ustcp v{}", env!("CARGO_PKG_VERSION"));
    tokio::select! {
        result = initialize_from_arguments() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted");
            Ok(())
        }
    }
}
