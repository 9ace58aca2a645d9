#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    chat_relay::run().await
}
