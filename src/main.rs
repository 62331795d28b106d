use tracing::error;

#[tokio::main]
async fn main() {
    mentorcall_lib::logger::init();
    if let Err(e) = mentorcall_lib::run().await {
        error!("demo failed: {}", e);
        std::process::exit(1);
    }
}
