#[tokio::main]
async fn main() {
    std::process::exit(provisioner::cli::run().await);
}
