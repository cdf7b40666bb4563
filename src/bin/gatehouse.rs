use anyhow::Result;
use gatehouse::cli::start;

// Main function
#[tokio::main]
async fn main() -> Result<()> {
    // Start the program
    let action = start()?;

    // Handle the action
    action.execute().await?;

    Ok(())
}
