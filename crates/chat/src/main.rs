/// Terminal entry point.
///
/// Logs go to stderr so the conversation on stdout stays readable.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .init();

    if let Err(error) = lumen::app::run().await {
        tracing::error!(error = %error, "lumen exited with an error");
        std::process::exit(1);
    }
}
