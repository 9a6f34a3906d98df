mod cli;
mod infra;
mod maintenance;
mod routes;
mod server;

use admission_intake::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
