#[tokio::main]
async fn main() -> anyhow::Result<()> {
    exam_proctor_lib::run().await
}
